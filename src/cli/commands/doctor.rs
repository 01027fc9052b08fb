//! Doctor command - verify environment and configuration.

use crate::cli::preflight::check_program;
use crate::cli::Output;
use crate::config::{EnvRequirements, Settings};
use console::style;
use std::path::Path;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

fn section(title: &str, checks: Vec<CheckResult>, all: &mut Vec<CheckResult>) {
    println!("{}", style(title).bold());
    if checks.is_empty() {
        println!("  {}", style("nothing to check").dim());
    }
    for check in &checks {
        check.print();
    }
    println!();
    all.extend(checks);
}

/// Run all diagnostic checks.
pub fn run_doctor(config_path: &Path, settings: &Settings) -> anyhow::Result<()> {
    Output::header("Troupe Doctor");
    println!();
    println!("Checking environment and configuration...\n");

    let mut checks = Vec::new();
    section("Configuration", check_config(config_path, settings), &mut checks);
    section("Environment", check_env(settings), &mut checks);
    section("MCP Servers", check_mcp_servers(settings), &mut checks);
    section("Storage", check_storage(settings), &mut checks);

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!("{} error(s) found. Please fix them before starting agents.", errors));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Troupe is ready to use.");
    }

    Ok(())
}

fn check_config(config_path: &Path, settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if config_path.exists() {
        results.push(CheckResult::ok("Config file", &config_path.display().to_string()));
    } else {
        results.push(CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: troupe config init",
        ));
    }

    match settings.validate() {
        Ok(()) => results.push(CheckResult::ok(
            "Components",
            &format!("{} agent(s), {} team(s)", settings.agents.len(), settings.teams.len()),
        )),
        Err(e) => results.push(CheckResult::error("Components", &e.to_string(), "Fix the config file")),
    }

    results
}

fn check_env(settings: &Settings) -> Vec<CheckResult> {
    let requirements = match EnvRequirements::for_settings(settings) {
        Ok(requirements) => requirements,
        Err(e) => return vec![CheckResult::error("Requirements", &e.to_string(), "Fix the model references")],
    };

    requirements
        .names()
        .iter()
        .map(|name| match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => {
                CheckResult::ok(name, &format!("configured ({})", mask(&value)))
            }
            Ok(_) => CheckResult::error(name, "empty", &format!("Set with: export {}='...'", name)),
            Err(_) => CheckResult::error(name, "not set", &format!("Set with: export {}='...'", name)),
        })
        .collect()
}

fn check_mcp_servers(settings: &Settings) -> Vec<CheckResult> {
    settings
        .mcp
        .servers
        .iter()
        .map(|server| {
            let Some(program) = server.command.split_whitespace().next() else {
                return CheckResult::error(&server.name, "no command", "Set `command` for this server");
            };
            if check_program(program).is_err() {
                return CheckResult::error(&server.name, &format!("{} not found", program), install_hint(program));
            }
            match program_version(program) {
                Some(version) => CheckResult::ok(&server.name, &format!("{} ({})", program, version)),
                None => CheckResult::ok(&server.name, program),
            }
        })
        .collect()
}

fn check_storage(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok("Data directory", &data_dir.display().to_string()));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    if !settings.database.enabled {
        results.push(CheckResult::warning(
            "Database",
            "disabled",
            "Sessions, memories and metrics are not kept",
        ));
        return results;
    }

    let db_path = settings.database_path();
    if db_path.exists() {
        let size = std::fs::metadata(&db_path)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok("Database", &format!("{} ({})", db_path.display(), size)));
    } else {
        results.push(CheckResult::warning(
            "Database",
            &format!("{} (not created yet)", db_path.display()),
            "Database will be created on the first run",
        ));
    }

    results
}

/// First line of `<program> --version`, if it answers.
fn program_version(program: &str) -> Option<String> {
    let output = Command::new(program).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout).lines().next()?.trim().to_string();
    if line.is_empty() {
        None
    } else {
        Some(line.chars().take(50).collect())
    }
}

/// Show only the ends of a secret.
fn mask(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

fn install_hint(program: &str) -> &'static str {
    match program {
        "npx" | "node" => "Install Node.js from https://nodejs.org",
        "uvx" | "uv" => "Install uv from https://docs.astral.sh/uv",
        "docker" => "Install Docker from https://docs.docker.com/get-docker",
        _ => "Make sure the program is installed and on PATH",
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
