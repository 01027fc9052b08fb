//! Evaluation commands.

use super::{build_runtime, open_store};
use crate::agent::{new_session_id, RunOptions};
use crate::cli::output::content_preview;
use crate::cli::{EvalAction, Output};
use crate::config::Settings;
use crate::storage::EvalRecord;
use chrono::Utc;
use console::style;
use std::time::Instant;

/// Run an eval subcommand.
pub async fn run_eval(action: &EvalAction, settings: Settings) -> anyhow::Result<()> {
    match action {
        EvalAction::Run { input, expected, target } => {
            let runtime = build_runtime(settings).await?;
            let result = async {
                let store = runtime.require_store()?.clone();
                let target = runtime.target(target.as_deref())?;
                let options = RunOptions {
                    user_id: None,
                    session_id: Some(new_session_id()),
                };

                let spinner = Output::spinner(&format!("Evaluating {}...", target.name()));
                let started = Instant::now();
                let output = target.run(input, options).await;
                spinner.finish_and_clear();
                let output = output?;

                let record = EvalRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    component_id: target.id().to_string(),
                    input: input.clone(),
                    expected: expected.clone(),
                    passed: passes(&output.content, expected),
                    output: output.content,
                    duration_ms: started.elapsed().as_millis() as u64,
                    created_at: Utc::now(),
                };
                store.add_eval(&record)?;
                Ok::<_, crate::TroupeError>(record)
            }
            .await;
            let closed = runtime.shutdown().await;
            let record = result?;
            closed?;

            println!("{}\n", record.output);
            if record.passed {
                Output::success(&format!("PASS: answer contains '{}'", record.expected));
            } else {
                Output::error(&format!("FAIL: answer does not contain '{}'", record.expected));
            }
            Output::kv("Eval", &record.id);
        }

        EvalAction::List { target } => {
            let store = open_store(&settings)?;
            let evals = store.list_evals(target.as_deref())?;
            if evals.is_empty() {
                Output::info("No evaluations recorded yet.");
                return Ok(());
            }
            let passed = evals.iter().filter(|e| e.passed).count();
            Output::header(&format!("Evaluations ({}/{} passed)", passed, evals.len()));
            println!();
            for eval in &evals {
                let mark = if eval.passed { style("PASS").green() } else { style("FAIL").red() };
                println!(
                    "  {} {} {} {}",
                    mark,
                    style(&eval.component_id).bold(),
                    content_preview(&eval.input, 50),
                    style(eval.created_at.format("%Y-%m-%d %H:%M")).dim()
                );
            }
        }
    }

    Ok(())
}

/// An answer passes when it contains the expected text, ignoring case.
fn passes(output: &str, expected: &str) -> bool {
    output.to_lowercase().contains(&expected.trim().to_lowercase())
}
