//! HTTP application exposing agents, teams and the session store.

use crate::agent::{RunEvent, RunOptions};
use crate::error::TroupeError;
use crate::runtime::{Runtime, Target};
use crate::storage::{SessionFilter, SessionStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Build the router over a runtime.
pub fn router(runtime: Arc<Runtime>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/config", get(config))
        .route("/agents", get(list_agents))
        .route("/agents/{id}", get(get_agent))
        .route("/agents/{id}/runs", post(run_agent))
        .route("/teams", get(list_teams))
        .route("/teams/{id}", get(get_team))
        .route("/teams/{id}/runs", post(run_team))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/metrics", get(list_metrics))
        .route("/evals", get(list_evals))
        .layer(cors)
        .with_state(runtime)
}

/// Serve until `shutdown` resolves, then release the runtime.
pub async fn serve<F>(runtime: Arc<Runtime>, listener: tokio::net::TcpListener, shutdown: F) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(runtime.clone());
    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown).await;
    info!("Server stopped");
    let closed = runtime.shutdown().await;
    served?;
    closed
}

// === Request/Response Types ===

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct SessionQuery {
    component_id: Option<String>,
    user_id: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ComponentQuery {
    component_id: Option<String>,
}

#[derive(Serialize)]
struct ConfigResponse {
    id: String,
    description: String,
    agents: Vec<String>,
    teams: Vec<String>,
    database: bool,
    mcp_servers: Vec<String>,
    services: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// An error rendered as `{"error": ...}` with a matching status.
struct ApiError(StatusCode, String);

impl From<TroupeError> for ApiError {
    fn from(e: TroupeError) -> Self {
        let status = match &e {
            TroupeError::NotFound(_) => StatusCode::NOT_FOUND,
            TroupeError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            TroupeError::Provider(_)
            | TroupeError::ProviderStatus { .. }
            | TroupeError::Http(_)
            | TroupeError::OpenAI(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.0.is_server_error() {
            warn!("Request failed: {}", self.1);
        }
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn store(runtime: &Runtime) -> ApiResult<&Arc<SessionStore>> {
    runtime
        .store()
        .ok_or_else(|| ApiError(StatusCode::SERVICE_UNAVAILABLE, "The database is disabled".to_string()))
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn config(State(runtime): State<Arc<Runtime>>) -> impl IntoResponse {
    let settings = runtime.settings();
    Json(ConfigResponse {
        id: settings.server.id.clone(),
        description: settings.server.description.clone(),
        agents: runtime.agents().iter().map(|a| a.id().to_string()).collect(),
        teams: runtime.teams().iter().map(|t| t.id().to_string()).collect(),
        database: runtime.store().is_some(),
        mcp_servers: runtime.mcp().server_names().into_iter().map(str::to_string).collect(),
        services: runtime.services(),
    })
}

async fn list_agents(State(runtime): State<Arc<Runtime>>) -> impl IntoResponse {
    Json(runtime.agents().iter().map(|a| a.info()).collect::<Vec<_>>())
}

async fn get_agent(State(runtime): State<Arc<Runtime>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let agent = runtime
        .agent(&id)
        .ok_or_else(|| TroupeError::NotFound(format!("agent {}", id)))?;
    Ok(Json(agent.info()))
}

async fn list_teams(State(runtime): State<Arc<Runtime>>) -> impl IntoResponse {
    Json(runtime.teams().iter().map(|t| t.info()).collect::<Vec<_>>())
}

async fn get_team(State(runtime): State<Arc<Runtime>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let team = runtime
        .team(&id)
        .ok_or_else(|| TroupeError::NotFound(format!("team {}", id)))?;
    Ok(Json(team.info()))
}

async fn run_agent(
    State(runtime): State<Arc<Runtime>>,
    Path(id): Path<String>,
    Json(req): Json<RunRequest>,
) -> ApiResult<Response> {
    let agent = runtime
        .agent(&id)
        .ok_or_else(|| TroupeError::NotFound(format!("agent {}", id)))?;
    run_target(Target::Agent(agent.clone()), req).await
}

async fn run_team(
    State(runtime): State<Arc<Runtime>>,
    Path(id): Path<String>,
    Json(req): Json<RunRequest>,
) -> ApiResult<Response> {
    let team = runtime
        .team(&id)
        .ok_or_else(|| TroupeError::NotFound(format!("team {}", id)))?;
    run_target(Target::Team(team.clone()), req).await
}

async fn run_target(target: Target, req: RunRequest) -> ApiResult<Response> {
    if req.message.trim().is_empty() {
        return Err(ApiError(StatusCode::BAD_REQUEST, "message must not be empty".to_string()));
    }
    let options = RunOptions {
        user_id: req.user_id,
        session_id: req.session_id,
    };

    if !req.stream {
        let output = target.run(&req.message, options).await?;
        return Ok(Json(output).into_response());
    }

    let events = target.run_stream(&req.message, options).map(|event| {
        let event = match event {
            Ok(event) => Event::default()
                .event(event_name(&event))
                .json_data(&event)
                .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())),
            Err(e) => {
                warn!("Streamed run failed: {}", e);
                Event::default().event("error").data(e.to_string())
            }
        };
        Ok::<_, Infallible>(event)
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}

fn event_name(event: &RunEvent) -> &'static str {
    match event {
        RunEvent::RunStarted { .. } => "run_started",
        RunEvent::Content { .. } => "content",
        RunEvent::ToolCallStarted { .. } => "tool_call_started",
        RunEvent::ToolCallCompleted(_) => "tool_call_completed",
        RunEvent::RunCompleted(_) => "run_completed",
    }
}

async fn list_sessions(
    State(runtime): State<Arc<Runtime>>,
    Query(query): Query<SessionQuery>,
) -> ApiResult<impl IntoResponse> {
    let filter = SessionFilter {
        component_id: query.component_id,
        user_id: query.user_id,
        limit: query.limit,
    };
    Ok(Json(store(&runtime)?.list_sessions(&filter)?))
}

async fn get_session(State(runtime): State<Arc<Runtime>>, Path(id): Path<String>) -> ApiResult<impl IntoResponse> {
    let session = store(&runtime)?
        .get_session(&id)?
        .ok_or_else(|| TroupeError::NotFound(format!("session {}", id)))?;
    Ok(Json(session))
}

async fn delete_session(State(runtime): State<Arc<Runtime>>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    if store(&runtime)?.delete_session(&id)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TroupeError::NotFound(format!("session {}", id)).into())
    }
}

async fn list_metrics(
    State(runtime): State<Arc<Runtime>>,
    Query(query): Query<ComponentQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(store(&runtime)?.list_metrics(query.component_id.as_deref())?))
}

async fn list_evals(
    State(runtime): State<Arc<Runtime>>,
    Query(query): Query<ComponentQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(store(&runtime)?.list_evals(query.component_id.as_deref())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EnvSnapshot, Settings};
    use crate::mcp::MultiMcpTools;
    use crate::model::scripted::{text, ScriptedModel};
    use crate::model::{ModelProvider, ModelRef};
    use std::time::Duration;

    const CONFIG: &str = r#"
[[agent]]
name = "Assistant"

[[agent]]
name = "Broken"
model = "openai:broken"

[[team]]
name = "Duo"
members = ["assistant", "broken"]
"#;

    /// Start a server on an ephemeral port and return its base URL.
    async fn start(database: bool) -> (String, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::from_toml(CONFIG).unwrap();
        settings.database.enabled = database;
        settings.database.path = dir.path().join("troupe.db").to_string_lossy().to_string();

        let mcp = Arc::new(MultiMcpTools::connect(&[], Duration::from_secs(1)).await.unwrap());
        let runtime = Runtime::assemble(settings, EnvSnapshot::default(), mcp, |model_ref: &ModelRef| {
            let responses = if model_ref.id == "broken" {
                Vec::new()
            } else {
                vec![text("Hi there"), text("Hi again")]
            };
            Ok(Arc::new(ScriptedModel::new(responses)) as Arc<dyn ModelProvider>)
        })
        .unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(Arc::new(runtime), listener, std::future::pending()));
        (format!("http://{}", addr), dir)
    }

    #[tokio::test]
    async fn test_health_and_listings() {
        let (base, _dir) = start(true).await;
        let http = reqwest::Client::new();

        let health: serde_json::Value = http.get(format!("{}/health", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(health["status"], "ok");

        let agents: serde_json::Value = http.get(format!("{}/agents", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(agents.as_array().unwrap().len(), 2);

        let team: serde_json::Value = http.get(format!("{}/teams/duo", base)).send().await.unwrap().json().await.unwrap();
        assert_eq!(team["kind"], "team");
        assert_eq!(team["members"][1], "broken");

        let missing = http.get(format!("{}/agents/nobody", base)).send().await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_and_session_roundtrip() {
        let (base, _dir) = start(true).await;
        let http = reqwest::Client::new();

        let output: serde_json::Value = http
            .post(format!("{}/agents/assistant/runs", base))
            .json(&serde_json::json!({ "message": "Hello", "user_id": "user_1" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(output["content"], "Hi there");
        let session_id = output["session_id"].as_str().unwrap().to_string();

        let session: serde_json::Value = http
            .get(format!("{}/sessions/{}", base, session_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(session["user_id"], "user_1");
        assert_eq!(session["runs"].as_array().unwrap().len(), 1);

        let deleted = http.delete(format!("{}/sessions/{}", base, session_id)).send().await.unwrap();
        assert_eq!(deleted.status(), reqwest::StatusCode::NO_CONTENT);
        let gone = http.delete(format!("{}/sessions/{}", base, session_id)).send().await.unwrap();
        assert_eq!(gone.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_provider_failure_is_bad_gateway() {
        let (base, _dir) = start(true).await;
        let response = reqwest::Client::new()
            .post(format!("{}/agents/broken/runs", base))
            .json(&serde_json::json!({ "message": "Hello" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("script exhausted"));
    }

    #[tokio::test]
    async fn test_streamed_run_sends_events() {
        let (base, _dir) = start(false).await;
        let body = reqwest::Client::new()
            .post(format!("{}/agents/assistant/runs", base))
            .json(&serde_json::json!({ "message": "Hello", "stream": true }))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();

        assert!(body.contains("event: run_started"));
        assert!(body.contains("event: content"));
        assert!(body.contains("event: run_completed"));
        assert!(body.contains("Hi there"));
    }

    #[tokio::test]
    async fn test_sessions_need_database() {
        let (base, _dir) = start(false).await;
        let response = reqwest::Client::new().get(format!("{}/sessions", base)).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    }
}
