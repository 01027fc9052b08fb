//! One-shot run command.

use super::build_runtime;
use crate::agent::RunOptions;
use crate::cli::Output;
use crate::config::Settings;

/// Send one message to an agent or team and print the answer.
pub async fn run_once(
    message: &str,
    target: Option<String>,
    session: Option<String>,
    user: Option<String>,
    json: bool,
    settings: Settings,
) -> anyhow::Result<()> {
    let runtime = build_runtime(settings).await?;

    let result = async {
        let target = runtime.target(target.as_deref())?;
        let options = RunOptions {
            user_id: user,
            session_id: session,
        };
        let spinner = Output::spinner(&format!("Asking {}...", target.name()));
        let output = target.run(message, options).await;
        spinner.finish_and_clear();
        output
    }
    .await;
    let closed = runtime.shutdown().await;

    let output = result?;
    closed?;

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for call in &output.tool_calls {
        Output::tool_call(&call.name, call.is_error);
    }
    println!("{}", output.content);
    println!();
    Output::run_metrics(&output.metrics);
    Output::kv("Session", &output.session_id);
    Ok(())
}
