//! Interactive chat command.

use super::build_runtime;
use crate::agent::{new_session_id, new_user_id, RunEvent, RunOptions};
use crate::cli::Output;
use crate::config::{CliSettings, Settings};
use crate::runtime::{Runtime, Target};
use console::style;
use futures::StreamExt;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

/// What to do with one line of user input.
#[derive(Debug, PartialEq)]
pub(crate) enum LineAction<'a> {
    /// Blank line; prompt again.
    Skip,
    /// A sentinel word; end the session.
    Exit,
    /// Forward to the agent or team.
    Send(&'a str),
}

/// Classify a line. Surrounding whitespace is ignored; only an exact sentinel
/// word (case-insensitively unless configured otherwise) ends the session.
pub(crate) fn classify<'a>(line: &'a str, settings: &CliSettings) -> LineAction<'a> {
    let input = line.trim();
    if input.is_empty() {
        return LineAction::Skip;
    }
    let is_sentinel = settings.exit_on.iter().any(|word| {
        if settings.case_sensitive {
            word == input
        } else {
            word.to_lowercase() == input.to_lowercase()
        }
    });
    if is_sentinel {
        LineAction::Exit
    } else {
        LineAction::Send(input)
    }
}

/// Run the interactive chat command.
pub async fn run_chat(
    target: Option<String>,
    session: Option<String>,
    user: Option<String>,
    no_stream: bool,
    settings: Settings,
) -> anyhow::Result<()> {
    let cli_settings = settings.cli.clone();
    let runtime = build_runtime(settings).await?;

    let result = chat_loop(&runtime, target.as_deref(), session, user, no_stream, &cli_settings).await;
    let closed = runtime.shutdown().await;
    result?;
    closed?;
    Ok(())
}

async fn chat_loop(
    runtime: &Runtime,
    target: Option<&str>,
    session: Option<String>,
    user: Option<String>,
    no_stream: bool,
    cli: &CliSettings,
) -> anyhow::Result<()> {
    let target = runtime.target(target)?;
    let options = RunOptions {
        user_id: Some(user.unwrap_or_else(new_user_id)),
        session_id: Some(session.unwrap_or_else(new_session_id)),
    };
    let stream = cli.stream && !no_stream;

    print_banner(runtime, &target, &options, cli);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", style(format!("{}:", cli.user_label)).green().bold());
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        let input = match classify(&line, cli) {
            LineAction::Skip => continue,
            LineAction::Exit => break,
            LineAction::Send(input) => input,
        };

        debug!("Sending {} chars to {}", input.len(), target.id());
        let outcome = if stream {
            stream_reply(&target, input, options.clone()).await
        } else {
            whole_reply(&target, input, options.clone()).await
        };
        if let Err(e) = outcome {
            Output::error(&format!("Error: {}", e));
        }
    }

    Output::info("Goodbye!");
    Ok(())
}

fn print_banner(runtime: &Runtime, target: &Target, options: &RunOptions, cli: &CliSettings) {
    println!("\n{}", style(&cli.title).bold().cyan());
    Output::kv("Talking to", &format!("{} ({})", target.name(), target.kind().as_str()));
    Output::kv("User", options.user_id.as_deref().unwrap_or_default());
    Output::kv("Session", options.session_id.as_deref().unwrap_or_default());
    let services = runtime.services();
    if !services.is_empty() {
        Output::kv("Services", &services.join(", "));
    }
    println!(
        "{}\n",
        style(format!("Type your message, or one of: {}", cli.exit_on.join(", "))).dim()
    );
}

async fn whole_reply(target: &Target, input: &str, options: RunOptions) -> crate::Result<()> {
    let spinner = Output::spinner("Thinking...");
    let output = target.run(input, options).await;
    spinner.finish_and_clear();
    let output = output?;

    for call in &output.tool_calls {
        Output::tool_call(&call.name, call.is_error);
    }
    println!("\n{} {}\n", style(format!("{}:", target.name())).cyan().bold(), output.content);
    Ok(())
}

async fn stream_reply(target: &Target, input: &str, options: RunOptions) -> crate::Result<()> {
    let mut events = target.run_stream(input, options);
    let mut speaking = false;

    while let Some(event) = events.next().await {
        match event? {
            RunEvent::Content { delta } => {
                if !speaking {
                    print!("\n{} ", style(format!("{}:", target.name())).cyan().bold());
                    speaking = true;
                }
                print!("{}", delta);
                std::io::stdout().flush()?;
            }
            RunEvent::ToolCallCompleted(call) => {
                if speaking {
                    println!();
                    speaking = false;
                }
                Output::tool_call(&call.name, call.is_error);
            }
            RunEvent::RunStarted { .. } | RunEvent::ToolCallStarted { .. } | RunEvent::RunCompleted(_) => {}
        }
    }
    println!("\n");
    Ok(())
}
