//! CLI command implementations.

mod chat;
mod config;
mod doctor;
mod eval;
mod knowledge;
mod run;
mod serve;
mod sessions;

pub use chat::run_chat;
pub use config::run_config;
pub use doctor::run_doctor;
pub use eval::run_eval;
pub use knowledge::run_knowledge;
pub use run::run_once;
pub use serve::run_serve;
pub use sessions::run_sessions;

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::runtime::Runtime;
use crate::storage::{SessionStore, TableNames};
use std::sync::Arc;

/// Check the environment, then build the runtime behind a spinner.
async fn build_runtime(settings: Settings) -> anyhow::Result<Arc<Runtime>> {
    if let Err(e) = preflight::check(Operation::Run, &settings) {
        preflight::report(&e);
        return Err(e.into());
    }

    let spinner = Output::spinner("Starting agents...");
    let runtime = Runtime::build(settings).await;
    spinner.finish_and_clear();

    match runtime {
        Ok(runtime) => Ok(Arc::new(runtime)),
        Err(e) => {
            preflight::report(&e);
            Err(e.into())
        }
    }
}

/// Open the session store without building agents.
fn open_store(settings: &Settings) -> anyhow::Result<SessionStore> {
    preflight::check(Operation::Store, settings)?;
    let path = settings.database_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(SessionStore::open(&path, TableNames::from_settings(&settings.database))?)
}
