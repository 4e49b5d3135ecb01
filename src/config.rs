//! Server configuration, read from the environment and overridable from the CLI.

use crate::errors::{AppError, AppResult};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_GIT_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBackend {
    Memory,
    File,
}

impl SessionBackend {
    pub fn parse(value: &str) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File),
            other => Err(AppError::Validation(format!(
                "Unknown session backend {:?} (expected memory or file)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub auth_secret: String,
    /// True when no secret was configured and one was generated for this process.
    pub auth_secret_generated: bool,
    pub session_backend: SessionBackend,
    pub git_timeout: Duration,
    pub git_author_name: String,
    pub git_author_email: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            auth_secret: Uuid::new_v4().simple().to_string(),
            auth_secret_generated: true,
            session_backend: SessionBackend::Memory,
            git_timeout: Duration::from_millis(DEFAULT_GIT_TIMEOUT_MS),
            git_author_name: "worldforge".to_string(),
            git_author_email: "worldforge@localhost".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AppResult<Self> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(host) = get("HOST") {
            config.host = host;
        }
        if let Some(port) = get("PORT") {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| AppError::Validation(format!("Invalid PORT: {:?}", port)))?;
        }
        if let Some(secret) = get("AUTH_SECRET") {
            config.auth_secret = secret;
            config.auth_secret_generated = false;
        }
        if let Some(backend) = get("SESSION_BACKEND") {
            config.session_backend = SessionBackend::parse(&backend)?;
        }
        if let Some(timeout) = get("GIT_TIMEOUT_MS") {
            let millis: u64 = timeout
                .trim()
                .parse()
                .map_err(|_| AppError::Validation(format!("Invalid GIT_TIMEOUT_MS: {:?}", timeout)))?;
            config.git_timeout = Duration::from_millis(millis);
        }
        if let Some(name) = get("GIT_AUTHOR_NAME") {
            config.git_author_name = name;
        }
        if let Some(email) = get("GIT_AUTHOR_EMAIL") {
            config.git_author_email = email;
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn users_file(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}
