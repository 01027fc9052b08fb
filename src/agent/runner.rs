//! The run loop: model turn, tool calls, repeat until the model answers.

use super::{
    new_session_id, Agent, HistoryTools, ParentRun, RunContext, RunEvent, RunOptions, RunOutput, RunToolProvider,
    ToolCallRecord,
};
use crate::error::{Result, TroupeError};
use crate::model::{Message, ModelChunk, ModelRequest, ModelResponse};
use crate::storage::{RunMetrics, RunRecord, SessionRecord, SessionStore};
use crate::tools::ToolRegistry;
use async_stream::try_stream;
use chrono::Utc;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

impl Agent {
    /// Answer `input` and return the final result.
    ///
    /// Every call reaches the model; identical inputs are never answered from a cache.
    pub async fn run(&self, input: &str, options: RunOptions) -> Result<RunOutput> {
        self.run_inner(input, options, None).await
    }

    /// Answer `input`, yielding progress events as they happen.
    ///
    /// The last event of a successful run is [`RunEvent::RunCompleted`].
    pub fn run_stream(
        &self,
        input: &str,
        options: RunOptions,
    ) -> impl Stream<Item = Result<RunEvent>> + Send + 'static {
        self.execute(input, options, None, true)
    }

    pub(crate) async fn run_inner(
        &self,
        input: &str,
        options: RunOptions,
        parent: Option<ParentRun>,
    ) -> Result<RunOutput> {
        let events = self.execute(input, options, parent, false);
        futures::pin_mut!(events);

        let mut output = None;
        while let Some(event) = events.next().await {
            if let RunEvent::RunCompleted(done) = event? {
                output = Some(done);
            }
        }
        output.ok_or_else(|| TroupeError::Agent(format!("Run of {} ended without a result", self.name)))
    }

    fn execute(
        &self,
        input: &str,
        options: RunOptions,
        parent: Option<ParentRun>,
        streaming: bool,
    ) -> impl Stream<Item = Result<RunEvent>> + Send + 'static {
        let agent = self.clone();
        let input = input.to_string();

        try_stream! {
            let started = Instant::now();
            let ctx = RunContext {
                run_id: Uuid::new_v4().to_string(),
                session_id: options.session_id.unwrap_or_else(new_session_id),
                user_id: options.user_id,
                component_id: agent.id.clone(),
                store: agent.store.clone(),
                child_runs: Arc::new(Mutex::new(Vec::new())),
            };
            info!("{} {} run {} in {}", agent.kind.as_str(), agent.id, ctx.run_id, ctx.session_id);
            yield RunEvent::RunStarted {
                run_id: ctx.run_id.clone(),
                session_id: ctx.session_id.clone(),
                component_id: agent.id.clone(),
            };

            let session = match &ctx.store {
                Some(store) => store.get_session(&ctx.session_id)?,
                None => None,
            };
            let memories = match (&ctx.store, &ctx.user_id) {
                (Some(store), Some(user_id)) if agent.flags.enable_user_memories => store.list_memories(user_id)?,
                _ => Vec::new(),
            };
            let registry = agent.run_registry(&ctx)?;
            let mut messages = agent.build_messages(&ctx, session.as_ref(), &memories, &input);
            let run_start = messages.len() - 1;

            let mut metrics = RunMetrics::default();
            let mut tool_calls: Vec<ToolCallRecord> = Vec::new();
            let mut content = None;

            for step in 1..=agent.max_steps {
                debug!("{} step {}/{}", agent.id, step, agent.max_steps);
                let request = ModelRequest {
                    messages: messages.clone(),
                    tools: registry.definitions(),
                };
                metrics.model_calls += 1;

                let turn = if streaming {
                    let mut chunks = agent.call_with_retries(|| agent.model.stream(&request)).await?;
                    let mut turn = ModelResponse::default();
                    while let Some(chunk) = chunks.next().await {
                        match chunk? {
                            ModelChunk::Content(delta) => {
                                turn.content.push_str(&delta);
                                yield RunEvent::Content { delta };
                            }
                            ModelChunk::ToolCall(call) => turn.tool_calls.push(call),
                            ModelChunk::Usage(usage) => turn.usage.add(usage),
                        }
                    }
                    turn
                } else {
                    agent.call_with_retries(|| agent.model.complete(&request)).await?
                };
                metrics.add_usage(&turn.usage);

                if turn.tool_calls.is_empty() {
                    messages.push(Message::assistant(turn.content.clone()));
                    content = Some(turn.content);
                    break;
                }

                messages.push(Message::assistant_with_tools(turn.content, turn.tool_calls.clone()));
                for call in turn.tool_calls {
                    yield RunEvent::ToolCallStarted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    };
                    info!("{} calling tool {} with {}", agent.id, call.name, call.arguments);

                    let outcome = registry.invoke(&call.name, &call.arguments).await;
                    metrics.tool_calls += 1;
                    messages.push(Message::tool_result(&call, outcome.content.clone()));

                    let record = ToolCallRecord {
                        id: call.id,
                        name: call.name,
                        arguments: call.arguments,
                        result: outcome.content,
                        is_error: outcome.is_error,
                    };
                    tool_calls.push(record.clone());
                    yield RunEvent::ToolCallCompleted(record);
                }
            }

            let content = match content {
                Some(content) => content,
                None => Err(TroupeError::Agent(format!(
                    "{} did not finish within {} steps",
                    agent.name, agent.max_steps
                )))?,
            };
            metrics.duration_ms = started.elapsed().as_millis() as u64;

            let children = take_runs(&ctx.child_runs)?;
            let mut total = metrics.clone();
            for child in &children {
                total.absorb(&child.metrics);
            }

            let record = RunRecord {
                run_id: ctx.run_id.clone(),
                component_id: agent.id.clone(),
                parent_run_id: parent.as_ref().map(|p| p.run_id.clone()),
                input,
                content: content.clone(),
                messages: messages.split_off(run_start),
                tool_calls: tool_calls.clone(),
                metrics,
                created_at: Utc::now(),
            };
            match &parent {
                Some(parent) => push_runs(&parent.child_runs, children, record)?,
                None => agent.persist(&ctx, children, record).await?,
            }

            info!(
                "{} finished run {} ({} model calls, {} tool calls, {} tokens)",
                agent.id, ctx.run_id, total.model_calls, total.tool_calls, total.total_tokens
            );
            yield RunEvent::RunCompleted(RunOutput {
                run_id: ctx.run_id,
                session_id: ctx.session_id,
                user_id: ctx.user_id,
                component_id: agent.id.clone(),
                content,
                tool_calls,
                metrics: total,
            });
        }
    }

    /// Base tools plus the tools bound to this run.
    fn run_registry(&self, ctx: &RunContext) -> Result<ToolRegistry> {
        let mut registry = self.tools.clone();
        registry.extend(HistoryTools::new(&self.id, self.flags.clone()).tools_for_run(ctx))?;
        for provider in &self.run_tools {
            registry.extend(provider.tools_for_run(ctx))?;
        }
        Ok(registry)
    }

    /// Call the model, retrying transient failures with linear backoff.
    async fn call_with_retries<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    warn!("Model call for {} failed (retry {}/{}): {}", self.id, attempt, self.retries, e);
                    tokio::time::sleep(self.retry_delay * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Store a finished top-level run with the member runs it delegated.
    #[instrument(skip_all, fields(session = %ctx.session_id))]
    async fn persist(&self, ctx: &RunContext, children: Vec<RunRecord>, run: RunRecord) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let today = Utc::now().date_naive();
        let user_id = ctx.user_id.as_deref();

        for child in children {
            store.record_metrics(&child.component_id, today, &child.metrics)?;
            store.append_run(&ctx.session_id, user_id, &self.id, self.kind, child)?;
        }
        store.record_metrics(&self.id, today, &run.metrics)?;
        let session = store.append_run(&ctx.session_id, user_id, &self.id, self.kind, run)?;

        if self.flags.enable_session_summaries && session.message_count() > self.summary_threshold {
            if let Err(e) = self.summarize(store, &session).await {
                warn!("Failed to summarize session {}: {}", session.session_id, e);
            }
        }
        Ok(())
    }

    async fn summarize(&self, store: &SessionStore, session: &SessionRecord) -> Result<()> {
        let conversation = session
            .transcript()
            .into_iter()
            .map(|(role, content)| format!("{}: {}", role, content))
            .collect::<Vec<_>>()
            .join("\n");

        let mut vars = HashMap::from([("conversation".to_string(), conversation)]);
        if let Some(previous) = &session.summary {
            vars.insert("previous_summary".to_string(), previous.summary.clone());
        }

        let request = ModelRequest {
            messages: vec![
                Message::system(self.prompts.render_with_custom(&self.prompts.summary.system, &vars)),
                Message::user(self.prompts.render_with_custom(&self.prompts.summary.user, &vars)),
            ],
            tools: Vec::new(),
        };
        let response = self.call_with_retries(|| self.model.complete(&request)).await?;
        store.set_summary(&session.session_id, response.content.trim())?;
        debug!("Updated summary of session {}", session.session_id);
        Ok(())
    }
}

fn take_runs(runs: &Mutex<Vec<RunRecord>>) -> Result<Vec<RunRecord>> {
    let mut runs = runs.lock().map_err(|e| TroupeError::Agent(format!("Run state lock poisoned: {}", e)))?;
    Ok(std::mem::take(&mut *runs))
}

/// Hand a delegated run and its own children to the run that started it.
fn push_runs(runs: &Mutex<Vec<RunRecord>>, children: Vec<RunRecord>, record: RunRecord) -> Result<()> {
    let mut runs = runs.lock().map_err(|e| TroupeError::Agent(format!("Run state lock poisoned: {}", e)))?;
    runs.extend(children);
    runs.push(record);
    Ok(())
}
