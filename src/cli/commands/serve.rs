//! HTTP server command.

use super::build_runtime;
use crate::cli::Output;
use crate::config::Settings;
use crate::server;
use tracing::warn;

/// Run the HTTP server until Ctrl+C.
pub async fn run_serve(host: Option<String>, port: Option<u16>, settings: Settings) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);
    let title = settings.server.id.clone();
    let runtime = build_runtime(settings).await?;

    let addr = format!("{}:{}", host, port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            runtime.shutdown().await?;
            return Err(e.into());
        }
    };

    Output::header(&format!("{} API Server", title));
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Agents:");
    for agent in runtime.agents() {
        Output::list_item(&format!("{} ({})", agent.id(), agent.model_ref()));
    }
    if !runtime.teams().is_empty() {
        println!("Teams:");
        for team in runtime.teams() {
            Output::list_item(&format!("{} -> {}", team.id(), team.info().members.join(", ")));
        }
    }
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Config", "GET  /config");
    Output::kv("Agents", "GET  /agents, /agents/{id}");
    Output::kv("Run agent", "POST /agents/{id}/runs");
    Output::kv("Teams", "GET  /teams, /teams/{id}");
    Output::kv("Run team", "POST /teams/{id}/runs");
    Output::kv("Sessions", "GET  /sessions, /sessions/{id}  DELETE /sessions/{id}");
    Output::kv("Metrics", "GET  /metrics, /evals");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    server::serve(runtime, listener, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    Output::info("Shutting down...");
}
