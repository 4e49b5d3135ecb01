//! HTTP surface: bearer-authenticated project CRUD and git history.

use crate::config::{Config, SessionBackend};
use crate::errors::{AppError, AppResult};
use crate::git::GitCli;
use crate::models::{
    AuthResponse, CommitRequest, CreateProjectResponse, CredentialsRequest, GitLogResponse, GitMessageResponse,
    GitStatusResponse, SuccessResponse, WhoAmIResponse, WorldDocument,
};
use crate::projects::ProjectStore;
use crate::session::{FileSessionStore, MemorySessionStore, SessionStore, TokenSigner};
use crate::users::UserStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::io::Read;
use std::sync::Arc;
use tiny_http::{Header, Method, Request, Response, Server};

const MAX_BODY_BYTES: u64 = 32 * 1024 * 1024;

pub struct AppState {
    pub store: ProjectStore,
    pub users: UserStore,
    pub sessions: Box<dyn SessionStore>,
    pub signer: TokenSigner,
}

impl AppState {
    pub fn from_config(config: &Config) -> Self {
        let vcs = Arc::new(GitCli::new(
            config.git_timeout,
            config.git_author_name.clone(),
            config.git_author_email.clone(),
        ));
        let sessions: Box<dyn SessionStore> = match config.session_backend {
            SessionBackend::Memory => Box::new(MemorySessionStore::new()),
            SessionBackend::File => Box::new(FileSessionStore::new(config.sessions_file())),
        };
        Self {
            store: ProjectStore::new(config.data_dir.clone(), vcs),
            users: UserStore::new(config.users_file()),
            sessions,
            signer: TokenSigner::new(config.auth_secret.clone()),
        }
    }

    /// Resolves an `Authorization` header value to a username.
    pub fn authenticate(&self, authorization: Option<&str>) -> AppResult<String> {
        let token = bearer_token(authorization)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;
        if !self.signer.verify(token) {
            return Err(AppError::Forbidden("Invalid token".to_string()));
        }
        self.sessions
            .get(token)?
            .ok_or_else(|| AppError::Forbidden("Session expired or invalid".to_string()))
    }

    fn open_session(&self, username: &str) -> AppResult<AuthResponse> {
        let token = self.signer.issue()?;
        self.sessions.set(&token, username)?;
        Ok(AuthResponse {
            success: true,
            token,
            username: username.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    fn ok<T: Serialize>(body: &T) -> AppResult<Self> {
        Self::with_status(200, body)
    }

    fn with_status<T: Serialize>(status: u16, body: &T) -> AppResult<Self> {
        Ok(Self {
            status,
            body: serde_json::to_value(body).map_err(|error| AppError::Internal(error.to_string()))?,
        })
    }

    fn error(error: &AppError) -> Self {
        Self {
            status: error.status_code(),
            body: json!({ "error": error.to_string() }),
        }
    }
}

/// Accept loop; every request is handled on its own thread.
pub fn serve(state: Arc<AppState>, addr: &str) -> AppResult<()> {
    let server = Server::http(addr).map_err(|error| AppError::Io(format!("failed to bind {}: {}", addr, error)))?;
    tracing::info!(addr = %addr, "listening");

    for request in server.incoming_requests() {
        let state = Arc::clone(&state);
        std::thread::spawn(move || {
            if let Err(error) = handle_request(&state, request) {
                tracing::error!(error = %error, "failed to write response");
            }
        });
    }
    Ok(())
}

fn handle_request(state: &AppState, mut request: Request) -> std::io::Result<()> {
    let method = request.method().clone();
    let url = request.url().to_string();
    let path = url.split('?').next().unwrap_or("/").to_string();
    let authorization = request
        .headers()
        .iter()
        .find(|header| header.field.equiv("Authorization"))
        .map(|header| header.value.as_str().to_string());

    let mut body = String::new();
    let read = Read::take(request.as_reader(), MAX_BODY_BYTES).read_to_string(&mut body);
    let reply = match read {
        Ok(_) => dispatch(state, &method, &path, authorization.as_deref(), &body),
        Err(error) => Reply::error(&AppError::Validation(format!("Failed to read body: {}", error))),
    };

    if reply.status >= 500 {
        tracing::error!(method = %method, path = %path, status = reply.status, body = %reply.body, "request failed");
    } else {
        tracing::debug!(method = %method, path = %path, status = reply.status, "request handled");
    }

    let json = serde_json::to_string(&reply.body)?;
    let mut response = Response::from_string(json).with_status_code(reply.status);
    for (field, value) in [
        ("Content-Type", "application/json"),
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Headers", "Authorization, Content-Type"),
        ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
    ] {
        if let Ok(header) = Header::from_bytes(field.as_bytes(), value.as_bytes()) {
            response = response.with_header(header);
        }
    }
    request.respond(response)
}

/// Routes one request to a reply; never fails, errors become JSON bodies.
pub fn dispatch(state: &AppState, method: &Method, path: &str, authorization: Option<&str>, body: &str) -> Reply {
    match route(state, method, path, authorization, body) {
        Ok(reply) => reply,
        Err(error) => Reply::error(&error),
    }
}

fn route(state: &AppState, method: &Method, path: &str, authorization: Option<&str>, body: &str) -> AppResult<Reply> {
    let segments = path_segments(path)?;
    let parts: Vec<&str> = segments.iter().map(String::as_str).collect();

    match (method, parts.as_slice()) {
        (Method::Options, _) => Reply::ok(&json!({ "ok": true })),
        (Method::Get, ["api", "health"]) => Reply::ok(&json!({ "ok": true })),

        (Method::Post, ["api", "auth", "register"]) => {
            let credentials: CredentialsRequest = parse_body(body)?;
            state.users.register(&credentials.username, &credentials.password)?;
            Reply::with_status(201, &state.open_session(&credentials.username)?)
        }
        (Method::Post, ["api", "auth", "login"]) => {
            let credentials: CredentialsRequest = parse_body(body)?;
            if !state.users.verify(&credentials.username, &credentials.password)? {
                return Err(AppError::Unauthorized("Invalid username or password".to_string()));
            }
            Reply::ok(&state.open_session(&credentials.username)?)
        }
        (Method::Post, ["api", "auth", "logout"]) => {
            state.authenticate(authorization)?;
            if let Some(token) = bearer_token(authorization) {
                state.sessions.delete(token)?;
            }
            Reply::ok(&SuccessResponse { success: true })
        }
        (Method::Get, ["api", "auth", "me"]) => {
            let username = state.authenticate(authorization)?;
            Reply::ok(&WhoAmIResponse { username })
        }

        (_, ["api", "projects", rest @ ..]) => {
            let username = state.authenticate(authorization)?;
            project_route(state, &username, method, rest, body)
        }

        _ => Err(AppError::NotFound(format!("Route {} {} not found", method, path))),
    }
}

fn project_route(state: &AppState, username: &str, method: &Method, rest: &[&str], body: &str) -> AppResult<Reply> {
    let store = &state.store;
    match (method, rest) {
        (Method::Get, []) => Reply::ok(&store.list(username)?),
        (Method::Post, []) => {
            let doc: WorldDocument = parse_body(body)?;
            let project = store.create(username, &doc)?;
            Reply::with_status(201, &CreateProjectResponse { success: true, project })
        }
        (Method::Get, [id]) => Reply::ok(&store.get(username, id)?),
        (Method::Put, [id]) => {
            let doc: WorldDocument = parse_body(body)?;
            store.update(username, id, &doc)?;
            Reply::ok(&SuccessResponse { success: true })
        }
        (Method::Delete, [id]) => {
            store.delete(username, id)?;
            Reply::ok(&SuccessResponse { success: true })
        }
        (Method::Post, [id, "git", "init"]) => {
            let message = store.git_init(username, id)?;
            Reply::ok(&GitMessageResponse { success: true, message })
        }
        (Method::Get, [id, "git", "status"]) => Reply::ok(&GitStatusResponse {
            changes: store.git_status(username, id)?,
        }),
        (Method::Post, [id, "git", "commit"]) => {
            let request: CommitRequest = if body.trim().is_empty() {
                CommitRequest::default()
            } else {
                parse_body(body)?
            };
            let message = store.git_commit(username, id, request.message.as_deref().unwrap_or_default())?;
            Reply::ok(&GitMessageResponse { success: true, message })
        }
        (Method::Get, [id, "git", "log"]) => Reply::ok(&GitLogResponse {
            logs: store.git_log(username, id)?,
        }),
        _ => Err(AppError::NotFound(format!("Route {} /api/projects/{} not found", method, rest.join("/")))),
    }
}

fn path_segments(path: &str) -> AppResult<Vec<String>> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .map_err(|_| AppError::Validation(format!("Malformed path segment: {}", segment)))
        })
        .collect()
}

fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let value = authorization?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn parse_body<T: DeserializeOwned>(body: &str) -> AppResult<T> {
    serde_json::from_str(body).map_err(|error| AppError::Validation(format!("Invalid JSON body: {}", error)))
}
