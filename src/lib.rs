//! Persists world-building projects as per-user directory trees, with optional
//! git history per project, behind a small bearer-authenticated HTTP API.

pub mod codec;
pub mod config;
pub mod errors;
pub mod git;
pub mod models;
pub mod projects;
pub mod routes;
pub mod session;
pub mod slug;
pub mod users;
pub mod workspace;

pub use config::Config;
pub use errors::{AppError, AppResult};
pub use models::{ProjectMeta, WorldDocument};
pub use projects::ProjectStore;

use crate::routes::AppState;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Starts the HTTP server and blocks for the lifetime of the process.
pub fn run(config: Config) -> AppResult<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    init_tracing(&config).map_err(AppError::Internal)?;

    if config.auth_secret_generated {
        tracing::warn!("AUTH_SECRET not set; generated a per-process secret, tokens will not survive a restart");
    }
    tracing::info!(
        data_dir = %config.data_dir.to_string_lossy(),
        session_backend = ?config.session_backend,
        "starting world store"
    );

    let state = Arc::new(AppState::from_config(&config));
    routes::serve(state, &config.bind_addr())
}

/// Converts every user's legacy flat project files to the directory layout.
pub fn migrate_all_legacy(config: &Config) -> AppResult<Vec<ProjectMeta>> {
    std::fs::create_dir_all(&config.data_dir)?;
    init_tracing(config).map_err(AppError::Internal)?;

    let state = AppState::from_config(config);
    let users_root = config.data_dir.join("users");
    let mut migrated = Vec::new();
    if !users_root.is_dir() {
        return Ok(migrated);
    }
    for entry in std::fs::read_dir(&users_root)? {
        let path = entry?.path();
        let Some(username) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !path.is_dir() || users::validate_username(username).is_err() {
            continue;
        }
        migrated.extend(state.store.migrate_legacy(username)?);
    }
    tracing::info!(count = migrated.len(), "legacy migration finished");
    Ok(migrated)
}

fn init_tracing(config: &Config) -> Result<(), String> {
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "server.log");
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
