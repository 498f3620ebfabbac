pub mod adapters;
mod applications;
mod bookmarks;
mod chat;
pub mod db;
pub mod eligibility;
pub mod errors;
mod grants;
mod in_flight;
pub mod lifecycle;
pub mod models;
pub mod policy;
mod retry;

pub use crate::applications::ApplicationManager;
pub use crate::bookmarks::BookmarkLedger;
pub use crate::chat::ChatService;
pub use crate::errors::{AppError, AppResult};
pub use crate::grants::GrantsCore;
pub use crate::retry::RetryPolicy;

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// JSON logs to `<log_dir>/grantwise.log.<date>`, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "grantwise.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}
