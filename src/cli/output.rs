//! CLI output formatting utilities.

use crate::storage::{RunMetrics, SessionInfo};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print a session listing row.
    pub fn session_info(session: &SessionInfo) {
        println!(
            "  {} {} ({} {}, {} runs, {}{})",
            style("*").cyan(),
            style(&session.session_id).bold(),
            session.component_kind.as_str(),
            session.component_id,
            session.run_count,
            session.updated_at.format("%Y-%m-%d %H:%M"),
            session
                .user_id
                .as_deref()
                .map(|u| format!(", user {}", u))
                .unwrap_or_default()
        );
    }

    /// Print a tool call as it happens.
    pub fn tool_call(name: &str, is_error: bool) {
        let mark = if is_error { style("✗").red() } else { style("✓").green() };
        println!("{} {}", style(format!("  [{}]", name)).dim(), mark);
    }

    /// Print a one-line usage summary of a run.
    pub fn run_metrics(metrics: &RunMetrics) {
        println!(
            "{}",
            style(format!(
                "{} model call(s), {} tool call(s), {} tokens, {}",
                metrics.model_calls,
                metrics.tool_calls,
                metrics.total_tokens,
                format_duration_ms(metrics.duration_ms)
            ))
            .dim()
        );
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format milliseconds to a human-readable string.
fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        return format!("{}ms", ms);
    }
    let total_seconds = ms / 1000;
    let minutes = total_seconds / 60;
    let secs = total_seconds % 60;

    if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

/// Truncate content with ellipsis, on a character boundary.
pub(crate) fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        format!("{}...", content.chars().take(max_chars).collect::<String>())
    }
}
