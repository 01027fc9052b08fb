//! Pre-flight checks before building a runtime.
//!
//! Validates that required secrets and MCP server programs are available
//! before anything connects to a provider or spawns a process.

use crate::config::{EnvRequirements, Settings};
use crate::error::{Result, TroupeError};
use std::path::Path;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Serving, chatting, one-shot runs and evaluations need every secret and MCP program.
    Run,
    /// Session and knowledge management only touch the database.
    Store,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Run => {
            settings.validate()?;
            EnvRequirements::for_settings(settings)?.check()?;
            for server in &settings.mcp.servers {
                if let Some(program) = server.command.split_whitespace().next() {
                    check_program(program).map_err(|e| {
                        TroupeError::Config(format!("MCP server '{}': {}", server.name, e))
                    })?;
                }
            }
        }
        Operation::Store => {
            if !settings.database.enabled {
                return Err(TroupeError::Config(
                    "The database is disabled ([database] enabled = false)".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// Check that a program can be found, either as a path or on `PATH`.
pub fn check_program(program: &str) -> Result<()> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        return if path.is_file() {
            Ok(())
        } else {
            Err(TroupeError::Config(format!("{} not found", program)))
        };
    }

    let found = std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()))
        .unwrap_or(false);
    if found {
        Ok(())
    } else {
        Err(TroupeError::Config(format!("{} not found on PATH", program)))
    }
}

/// Print a missing-environment error as one bullet per variable.
pub fn report(error: &TroupeError) {
    use super::Output;

    match error {
        TroupeError::MissingEnv(names) => {
            Output::error("Missing required environment variables:");
            for name in names {
                Output::list_item(name);
            }
        }
        other => Output::error(&other.to_string()),
    }
    Output::info("Run 'troupe doctor' for detailed diagnostics.");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_operations_need_database() {
        let mut settings = Settings::default();
        assert!(check(Operation::Store, &settings).is_ok());
        settings.database.enabled = false;
        assert!(check(Operation::Store, &settings).is_err());
    }

    #[test]
    fn test_missing_program() {
        assert!(check_program("troupe-test-no-such-program").is_err());
        assert!(check_program("/definitely/not/here").is_err());
    }
}
