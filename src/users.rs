use crate::errors::{AppError, AppResult};
use crate::workspace::{now_millis, read_json_file, validate_component, write_json_file};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

const USERS_FILE_VERSION: &str = "1.0";
const MAX_USERNAME_CHARS: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    /// Argon2id PHC string; embeds its own salt and cost parameters.
    pub password_hash: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsersFile {
    version: String,
    #[serde(default)]
    users: Vec<UserRecord>,
}

impl Default for UsersFile {
    fn default() -> Self {
        Self {
            version: USERS_FILE_VERSION.to_string(),
            users: Vec::new(),
        }
    }
}

/// Registered credentials, persisted as one JSON file rewritten on every change.
#[derive(Debug)]
pub struct UserStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl UserStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn register(&self, username: &str, password: &str) -> AppResult<()> {
        validate_username(username)?;
        if password.is_empty() {
            return Err(AppError::Validation("Password is required".to_string()));
        }

        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::Internal("user store lock poisoned".to_string()))?;
        let mut file = self.load()?;
        if file.users.iter().any(|user| user.username == username) {
            return Err(AppError::Conflict(format!("User {} already exists", username)));
        }

        file.users.push(UserRecord {
            username: username.to_string(),
            password_hash: hash_password(password)?,
            created_at: now_millis(),
        });
        write_json_file(&self.path, &file)?;
        tracing::info!(username = %username, "registered user");
        Ok(())
    }

    pub fn verify(&self, username: &str, password: &str) -> AppResult<bool> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::Internal("user store lock poisoned".to_string()))?;
        let file = self.load()?;
        Ok(file
            .users
            .iter()
            .find(|user| user.username == username)
            .is_some_and(|user| password_matches(&user.password_hash, password)))
    }

    pub fn usernames(&self) -> AppResult<Vec<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::Internal("user store lock poisoned".to_string()))?;
        Ok(self.load()?.users.into_iter().map(|user| user.username).collect())
    }

    fn load(&self) -> AppResult<UsersFile> {
        if !self.path.exists() {
            return Ok(UsersFile::default());
        }
        read_json_file(&self.path)
    }
}

/// Usernames become directory names, so they are restricted to a portable set.
pub fn validate_username(username: &str) -> AppResult<()> {
    validate_component(username, "username")?;
    let portable = username
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.');
    if !portable || username.chars().count() > MAX_USERNAME_CHARS {
        return Err(AppError::Validation(format!("Invalid username: {:?}", username)));
    }
    Ok(())
}

fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|error| AppError::Internal(format!("password salt: {}", error)))?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| AppError::Internal(format!("password hash: {}", error)))
}

fn password_matches(stored: &str, password: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(error) => {
            tracing::warn!(error = %error, "stored password hash is not a PHC string");
            false
        }
    }
}
