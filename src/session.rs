use crate::errors::{AppError, AppResult};
use crate::workspace::{read_json_file, write_json_file};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Bearer token -> username lookup. Call sites only see this trait, so the
/// backing can be swapped without touching routes.
pub trait SessionStore: Send + Sync {
    fn get(&self, token: &str) -> AppResult<Option<String>>;
    fn set(&self, token: &str, username: &str) -> AppResult<()>;
    fn delete(&self, token: &str) -> AppResult<()>;
}

/// Process-local sessions. A restart invalidates every token.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, token: &str) -> AppResult<Option<String>> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| AppError::Internal("session store lock poisoned".to_string()))?;
        Ok(sessions.get(token).cloned())
    }

    fn set(&self, token: &str, username: &str) -> AppResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| AppError::Internal("session store lock poisoned".to_string()))?;
        sessions.insert(token.to_string(), username.to_string());
        Ok(())
    }

    fn delete(&self, token: &str) -> AppResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| AppError::Internal("session store lock poisoned".to_string()))?;
        sessions.remove(token);
        Ok(())
    }
}

/// Sessions persisted as a single JSON object, rewritten whole on each change.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> AppResult<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        read_json_file(&self.path)
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, token: &str) -> AppResult<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::Internal("session file lock poisoned".to_string()))?;
        Ok(self.load()?.remove(token))
    }

    fn set(&self, token: &str, username: &str) -> AppResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::Internal("session file lock poisoned".to_string()))?;
        let mut sessions = self.load()?;
        sessions.insert(token.to_string(), username.to_string());
        write_json_file(&self.path, &sessions)
    }

    fn delete(&self, token: &str) -> AppResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| AppError::Internal("session file lock poisoned".to_string()))?;
        let mut sessions = self.load()?;
        if sessions.remove(token).is_some() {
            write_json_file(&self.path, &sessions)?;
        }
        Ok(())
    }
}

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks `<id>.<signature>` bearer tokens, where the signature is
/// base64url HMAC-SHA256 of the id.
#[derive(Clone)]
pub struct TokenSigner {
    secret: String,
}

impl TokenSigner {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn issue(&self) -> AppResult<String> {
        let id = Uuid::new_v4().simple().to_string();
        let mut mac = self.mac()?;
        mac.update(id.as_bytes());
        Ok(format!("{}.{}", id, URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())))
    }

    /// Constant-time check of the signature half of `token`.
    pub fn verify(&self, token: &str) -> bool {
        let Some((id, signature)) = token.split_once('.').filter(|(id, _)| !id.is_empty()) else {
            return false;
        };
        let Ok(signature) = URL_SAFE_NO_PAD.decode(signature) else {
            return false;
        };
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(id.as_bytes());
        mac.verify_slice(&signature).is_ok()
    }

    fn mac(&self) -> AppResult<HmacSha256> {
        HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|error| AppError::Internal(format!("token signer key: {}", error)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn SessionStore) {
        assert_eq!(store.get("t1").expect("get"), None);
        store.set("t1", "mira").expect("set");
        assert_eq!(store.get("t1").expect("get").as_deref(), Some("mira"));
        store.delete("t1").expect("delete");
        assert_eq!(store.get("t1").expect("get"), None);
        store.delete("missing").expect("deleting an unknown token is fine");
    }

    #[test]
    fn memory_store_get_set_delete() {
        exercise(&MemorySessionStore::new());
    }

    #[test]
    fn file_store_get_set_delete() {
        let root = tempfile::tempdir().expect("temp dir");
        exercise(&FileSessionStore::new(root.path().join("sessions.json")));
    }

    #[test]
    fn file_store_survives_reopen() {
        let root = tempfile::tempdir().expect("temp dir");
        let path = root.path().join("sessions.json");
        FileSessionStore::new(path.clone()).set("t1", "tor").expect("set");
        let reopened = FileSessionStore::new(path);
        assert_eq!(reopened.get("t1").expect("get").as_deref(), Some("tor"));
    }

    #[test]
    fn signed_tokens_verify_only_with_same_secret() {
        let signer = TokenSigner::new("alpha");
        let token = signer.issue().expect("issue");
        assert!(signer.verify(&token));
        assert!(!TokenSigner::new("beta").verify(&token));
        assert!(!signer.verify("not-a-token"));
        assert!(!signer.verify(&format!("{}x", token)));
    }

    #[test]
    fn signature_is_bound_to_the_token_id() {
        let signer = TokenSigner::new("alpha");
        let token = signer.issue().expect("issue");
        let (_, signature) = token.split_once('.').expect("signed token");
        let swapped = format!("{}.{}", Uuid::new_v4().simple(), signature);
        assert!(!signer.verify(&swapped));
        assert!(!signer.verify(&format!(".{}", signature)));
    }
}
