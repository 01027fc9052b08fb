//! Everything a configuration describes, built once and shared by the shells.
//!
//! `Runtime::build` checks the environment, opens the store, connects MCP
//! servers and binds agents and teams to their models and tools. The HTTP
//! server, the chat loop and one-shot runs all hold it behind an `Arc` and
//! release it with [`Runtime::shutdown`].

use crate::agent::{Agent, AgentInfo, RunEvent, RunOptions, RunOutput};
use crate::config::{AgentFlags, EnvRequirements, EnvSnapshot, Prompts, Settings};
use crate::error::{Result, TroupeError};
use crate::mcp::{McpServerSpec, McpTransport, MultiMcpTools, StdioTransport};
use crate::model::{build_provider, ModelProvider, ModelRef};
use crate::storage::{ComponentKind, SessionStore, TableNames};
use crate::team::Team;
use crate::tools::{builtin_toolkit, ToolRegistry};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// An agent or a team, addressed by id.
#[derive(Clone)]
pub enum Target {
    Agent(Agent),
    Team(Team),
}

impl Target {
    pub fn id(&self) -> &str {
        match self {
            Target::Agent(agent) => agent.id(),
            Target::Team(team) => team.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Target::Agent(agent) => agent.name(),
            Target::Team(team) => team.name(),
        }
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Target::Agent(_) => ComponentKind::Agent,
            Target::Team(_) => ComponentKind::Team,
        }
    }

    pub fn info(&self) -> AgentInfo {
        match self {
            Target::Agent(agent) => agent.info(),
            Target::Team(team) => team.info(),
        }
    }

    pub async fn run(&self, input: &str, options: RunOptions) -> Result<RunOutput> {
        match self {
            Target::Agent(agent) => agent.run(input, options).await,
            Target::Team(team) => team.run(input, options).await,
        }
    }

    pub fn run_stream(&self, input: &str, options: RunOptions) -> BoxStream<'static, Result<RunEvent>> {
        match self {
            Target::Agent(agent) => agent.run_stream(input, options).boxed(),
            Target::Team(team) => team.run_stream(input, options).boxed(),
        }
    }
}

/// Built agents, teams and the resources they share.
pub struct Runtime {
    settings: Settings,
    store: Option<Arc<SessionStore>>,
    mcp: Arc<MultiMcpTools>,
    agents: Vec<Agent>,
    teams: Vec<Team>,
    toolkits: Vec<String>,
    shut_down: AtomicBool,
}

impl Runtime {
    /// Build from settings using the hosted providers and stdio MCP servers.
    ///
    /// Missing environment variables stop the build before any network call or
    /// child process.
    #[instrument(skip_all)]
    pub async fn build(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let env = EnvRequirements::for_settings(&settings)?.check()?;

        let specs = settings
            .mcp
            .servers
            .iter()
            .map(McpServerSpec::from_settings)
            .collect::<Result<Vec<_>>>()?;
        let mcp = Arc::new(
            MultiMcpTools::connect_with(
                &specs,
                Duration::from_secs(settings.mcp.timeout_secs),
                settings.mcp.allow_partial_failure,
                |spec| Ok(Box::new(StdioTransport::spawn(spec)?) as Box<dyn McpTransport>),
            )
            .await?,
        );

        let model_settings = settings.models.clone();
        match Self::assemble(settings, env, mcp.clone(), |model_ref| {
            build_provider(model_ref, &model_settings)
        }) {
            Ok(runtime) => Ok(runtime),
            Err(e) => {
                if let Err(close_err) = mcp.close().await {
                    warn!("Failed to close MCP servers: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Bind agents and teams using already connected MCP servers and a model factory.
    pub fn assemble<M>(settings: Settings, env: EnvSnapshot, mcp: Arc<MultiMcpTools>, make_model: M) -> Result<Self>
    where
        M: Fn(&ModelRef) -> Result<Arc<dyn ModelProvider>>,
    {
        settings.validate()?;
        let prompts = Arc::new(Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?);

        let store = if settings.database.enabled {
            let path = settings.database_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(Arc::new(SessionStore::open(&path, TableNames::from_settings(&settings.database))?))
        } else {
            None
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.models.timeout_secs))
            .user_agent(concat!("troupe/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let mut builder = Builder {
            settings: &settings,
            env: &env,
            mcp: &mcp,
            http: &http,
            store: store.clone(),
            prompts: prompts.clone(),
            models: HashMap::new(),
            make_model,
        };

        let mut agents = Vec::with_capacity(settings.agents.len());
        for spec in &settings.agents {
            agents.push(builder.agent(&ComponentSpec {
                id: spec.resolved_id(),
                name: &spec.name,
                role: &spec.role,
                description: &spec.description,
                instructions: &spec.instructions,
                model: spec.model.as_deref(),
                tools: &spec.tools,
                mcp_servers: &spec.mcp_servers,
                flags: &spec.flags,
                max_steps: spec.max_steps,
                retries: spec.retries,
                retry_delay_ms: spec.retry_delay_ms,
            })?);
        }

        let mut teams = Vec::with_capacity(settings.teams.len());
        for spec in &settings.teams {
            let coordinator = builder.agent(&ComponentSpec {
                id: spec.resolved_id(),
                name: &spec.name,
                role: &spec.role,
                description: &spec.description,
                instructions: &spec.instructions,
                model: spec.model.as_deref(),
                tools: &spec.tools,
                mcp_servers: &spec.mcp_servers,
                flags: &spec.flags,
                max_steps: spec.max_steps,
                retries: spec.retries,
                retry_delay_ms: spec.retry_delay_ms,
            })?;

            let mut members = Vec::with_capacity(spec.members.len());
            for key in &spec.members {
                let id = settings
                    .find_agent(key)
                    .map(|a| a.resolved_id())
                    .ok_or_else(|| TroupeError::Config(format!("Unknown team member '{}'", key)))?;
                let member = agents
                    .iter()
                    .find(|a| a.id() == id)
                    .cloned()
                    .ok_or_else(|| TroupeError::Config(format!("Unknown team member '{}'", key)))?;
                members.push(member);
            }
            teams.push(Team::new(coordinator, members, &prompts)?);
        }

        let mut toolkits: Vec<String> = settings
            .agents
            .iter()
            .flat_map(|a| a.tools.iter())
            .chain(settings.teams.iter().flat_map(|t| t.tools.iter()))
            .cloned()
            .collect();
        toolkits.sort();
        toolkits.dedup();

        info!(
            "Runtime ready: {} agent(s), {} team(s), {} MCP server(s)",
            agents.len(),
            teams.len(),
            mcp.server_names().len()
        );
        Ok(Self {
            settings,
            store,
            mcp,
            agents,
            teams,
            toolkits,
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> Option<&Arc<SessionStore>> {
        self.store.as_ref()
    }

    /// The store, or an error naming what needed it.
    pub fn require_store(&self) -> Result<&Arc<SessionStore>> {
        self.store
            .as_ref()
            .ok_or_else(|| TroupeError::Config("The database is disabled ([database] enabled = false)".to_string()))
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn teams(&self) -> &[Team] {
        &self.teams
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id() == id)
    }

    pub fn team(&self, id: &str) -> Option<&Team> {
        self.teams.iter().find(|t| t.id() == id)
    }

    /// Resolve an agent or team by id or name; without a key, the first team,
    /// else the first agent.
    pub fn target(&self, key: Option<&str>) -> Result<Target> {
        let Some(key) = key else {
            return self
                .teams
                .first()
                .cloned()
                .map(Target::Team)
                .or_else(|| self.agents.first().cloned().map(Target::Agent))
                .ok_or_else(|| TroupeError::Config("No agents configured".to_string()));
        };

        let slug = crate::config::slugify(key);
        if let Some(team) = self.teams.iter().find(|t| t.id() == key || t.id() == slug) {
            return Ok(Target::Team(team.clone()));
        }
        if let Some(agent) = self.agents.iter().find(|a| a.id() == key || a.id() == slug) {
            return Ok(Target::Agent(agent.clone()));
        }
        Err(TroupeError::NotFound(format!("agent or team '{}'", key)))
    }

    /// Connected services: MCP servers and built-in toolkits.
    pub fn services(&self) -> Vec<String> {
        self.mcp
            .server_names()
            .into_iter()
            .map(str::to_string)
            .chain(self.toolkits.iter().cloned())
            .collect()
    }

    pub fn mcp(&self) -> &Arc<MultiMcpTools> {
        &self.mcp
    }

    /// Release MCP connections. Only the first call does any work.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Shutting down");
        self.mcp.close().await
    }
}

/// The fields agents and team coordinators have in common.
struct ComponentSpec<'a> {
    id: String,
    name: &'a str,
    role: &'a Option<String>,
    description: &'a Option<String>,
    instructions: &'a [String],
    model: Option<&'a str>,
    tools: &'a [String],
    mcp_servers: &'a [String],
    flags: &'a AgentFlags,
    max_steps: usize,
    retries: u32,
    retry_delay_ms: u64,
}

struct Builder<'a, M> {
    settings: &'a Settings,
    env: &'a EnvSnapshot,
    mcp: &'a MultiMcpTools,
    http: &'a reqwest::Client,
    store: Option<Arc<SessionStore>>,
    prompts: Arc<Prompts>,
    /// One provider per model reference.
    models: HashMap<String, Arc<dyn ModelProvider>>,
    make_model: M,
}

impl<M> Builder<'_, M>
where
    M: Fn(&ModelRef) -> Result<Arc<dyn ModelProvider>>,
{
    fn model(&mut self, reference: Option<&str>) -> Result<Arc<dyn ModelProvider>> {
        let reference = reference.unwrap_or(&self.settings.models.default);
        if let Some(model) = self.models.get(reference) {
            return Ok(model.clone());
        }
        let model_ref: ModelRef = reference.parse()?;
        let model = (self.make_model)(&model_ref)?;
        self.models.insert(reference.to_string(), model.clone());
        Ok(model)
    }

    fn agent(&mut self, spec: &ComponentSpec<'_>) -> Result<Agent> {
        let model = self.model(spec.model)?;

        let mut tools = ToolRegistry::new();
        for toolkit in spec.tools {
            tools.extend(builtin_toolkit(toolkit, self.http, self.env)?)?;
        }
        for server in spec.mcp_servers {
            if let Some((_, reason)) = self.mcp.failed().iter().find(|(name, _)| name == server) {
                warn!("{} loses the tools of MCP server {}: {}", spec.id, server, reason);
                continue;
            }
            tools.extend(self.mcp.tools_for(server))?;
        }

        let mut agent = Agent::new(spec.name, model)
            .with_id(&spec.id)
            .with_role(spec.role.clone())
            .with_description(spec.description.clone())
            .with_instructions(spec.instructions.to_vec())
            .with_tools(tools)
            .with_flags(spec.flags.clone())
            .with_max_steps(spec.max_steps)
            .with_retries(spec.retries, Duration::from_millis(spec.retry_delay_ms))
            .with_summary_threshold(self.settings.database.summary_threshold)
            .with_prompts(self.prompts.clone());
        if let Some(store) = &self.store {
            agent = agent.with_store(store.clone());
        }
        if agent.inert_flags() {
            warn!(
                "{} enables history, memory or knowledge features but the database is disabled; they will do nothing",
                spec.id
            );
        }
        Ok(agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::scripted::{text, ScriptedModel};

    const CONFIG: &str = r#"
[models]
default = "openai:gpt-4o"

[[agent]]
name = "Outline Agent"
role = "Outline posts"
tools = ["factorial"]

[[agent]]
name = "Writer"
model = "anthropic:claude-sonnet-4-5"
add_history_to_context = true

[[team]]
name = "Content Team"
members = ["outline-agent", "Writer"]
"#;

    fn settings(dir: &tempfile::TempDir, extra: &str) -> Settings {
        let mut settings = Settings::from_toml(&format!("{}\n{}", CONFIG, extra)).unwrap();
        settings.database.path = dir.path().join("troupe.db").to_string_lossy().to_string();
        settings
    }

    fn scripted(_: &ModelRef) -> Result<Arc<dyn ModelProvider>> {
        Ok(Arc::new(ScriptedModel::new(vec![text("Hello from the script")])))
    }

    fn empty_mcp() -> Arc<MultiMcpTools> {
        Arc::new(
            tokio_test::block_on(MultiMcpTools::connect(&[], Duration::from_secs(1))).unwrap(),
        )
    }

    #[test]
    fn test_assemble_binds_agents_and_teams() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::assemble(settings(&dir, ""), EnvSnapshot::default(), empty_mcp(), scripted).unwrap();

        assert_eq!(runtime.agents().len(), 2);
        assert_eq!(runtime.agent("outline-agent").unwrap().tool_names(), vec!["factorial"]);
        assert!(runtime.store().is_some());

        let team = runtime.team("content-team").unwrap();
        assert_eq!(team.info().members, vec!["outline-agent", "writer"]);
        assert_eq!(runtime.services(), vec!["factorial"]);
    }

    #[test]
    fn test_target_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::assemble(settings(&dir, ""), EnvSnapshot::default(), empty_mcp(), scripted).unwrap();

        assert_eq!(runtime.target(None).unwrap().kind(), ComponentKind::Team);
        assert_eq!(runtime.target(Some("Writer")).unwrap().id(), "writer");
        assert!(matches!(runtime.target(Some("editor")), Err(TroupeError::NotFound(_))));
    }

    #[test]
    fn test_duplicate_tools_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(&dir, "");
        settings.agents[0].tools = vec!["factorial".to_string(), "math".to_string()];

        let result = Runtime::assemble(settings, EnvSnapshot::default(), empty_mcp(), scripted);
        assert!(matches!(result, Err(TroupeError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_env_stops_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(
            &dir,
            r#"
[[mcp.server]]
name = "ghost"
command = "troupe-test-no-such-binary --stdio"
required_env = ["TROUPE_TEST_UNSET_TOKEN"]
"#,
        );

        match Runtime::build(settings).await {
            Err(TroupeError::MissingEnv(names)) => assert!(names.contains(&"TROUPE_TEST_UNSET_TOKEN".to_string())),
            Err(other) => panic!("expected missing env, got {}", other),
            Ok(_) => panic!("expected missing env"),
        }
    }

    #[tokio::test]
    async fn test_run_and_shutdown_once() {
        let dir = tempfile::tempdir().unwrap();
        let mcp = Arc::new(MultiMcpTools::connect(&[], Duration::from_secs(1)).await.unwrap());
        let runtime = Runtime::assemble(settings(&dir, ""), EnvSnapshot::default(), mcp, scripted).unwrap();

        let output = runtime
            .target(Some("writer"))
            .unwrap()
            .run("Hi", RunOptions::default())
            .await
            .unwrap();
        assert_eq!(output.content, "Hello from the script");

        let session = runtime.store().unwrap().get_session(&output.session_id).unwrap();
        assert!(session.is_some());

        runtime.shutdown().await.unwrap();
        runtime.shutdown().await.unwrap();
    }
}
