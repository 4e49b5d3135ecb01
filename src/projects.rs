use crate::codec;
use crate::errors::{AppError, AppResult};
use crate::git::VersionControl;
use crate::models::{GitChange, GitLogEntry, ProjectMeta, WorldDocument, DEFAULT_CHRONICLE, DEFAULT_CONTEXT, FORMAT_VERSION};
use crate::slug::slugify;
use crate::users::validate_username;
use crate::workspace::{projects_root, read_json_file, validate_component, MANIFEST_FILE};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";
const LEGACY_EXTENSION: &str = "json";

/// Where a project lives on disk and which layout it uses.
///
/// `Legacy` is the older single-file format (`<projects>/<id>.json` holding the
/// whole document). It is only ever read; any write converts it to `Current`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredProject {
    Current(PathBuf),
    Legacy(PathBuf),
}

impl StoredProject {
    pub fn locate(projects_root: &Path, id: &str) -> Option<Self> {
        let dir = projects_root.join(id);
        if dir.is_dir() {
            return Some(Self::Current(dir));
        }
        let flat = projects_root.join(format!("{}.{}", id, LEGACY_EXTENSION));
        if flat.is_file() {
            return Some(Self::Legacy(flat));
        }
        None
    }

    pub fn read_meta(&self) -> AppResult<ProjectMeta> {
        match self {
            Self::Current(dir) => codec::read_meta(dir),
            Self::Legacy(path) => {
                let doc: WorldDocument = read_json_file(path)?;
                Ok(legacy_meta(path, &doc))
            }
        }
    }

    pub fn read(&self) -> AppResult<WorldDocument> {
        match self {
            Self::Current(dir) => codec::read(dir),
            Self::Legacy(path) => {
                let mut doc: WorldDocument = read_json_file(path)?;
                let meta = legacy_meta(path, &doc);
                doc.id = Some(meta.id);
                doc.created_at = Some(meta.created_at);
                doc.last_modified = Some(meta.last_modified);
                doc.context.get_or_insert_with(|| DEFAULT_CONTEXT.to_string());
                doc.chronicle_text.get_or_insert_with(|| DEFAULT_CHRONICLE.to_string());
                Ok(doc)
            }
        }
    }
}

/// CRUD over one data directory holding every user's projects.
pub struct ProjectStore {
    data_dir: PathBuf,
    vcs: Arc<dyn VersionControl>,
}

impl ProjectStore {
    pub fn new(data_dir: impl Into<PathBuf>, vcs: Arc<dyn VersionControl>) -> Self {
        Self {
            data_dir: data_dir.into(),
            vcs,
        }
    }

    pub fn projects_root(&self, username: &str) -> AppResult<PathBuf> {
        validate_username(username)?;
        Ok(projects_root(&self.data_dir, username))
    }

    /// Manifests of every project the user owns, most recently modified first.
    pub fn list(&self, username: &str) -> AppResult<Vec<ProjectMeta>> {
        let root = self.projects_root(username)?;
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut projects = Vec::new();
        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            let stored = if path.is_dir() {
                if !path.join(MANIFEST_FILE).is_file() {
                    continue;
                }
                StoredProject::Current(path)
            } else if is_legacy_file(&path) {
                if legacy_id(&path).is_some_and(|id| root.join(id).is_dir()) {
                    continue;
                }
                StoredProject::Legacy(path)
            } else {
                continue;
            };

            match stored.read_meta() {
                Ok(meta) => projects.push(meta),
                Err(error) => {
                    tracing::warn!(?stored, error = %error, "skipping unreadable project manifest");
                }
            }
        }

        projects.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
        Ok(projects)
    }

    pub fn create(&self, username: &str, doc: &WorldDocument) -> AppResult<ProjectMeta> {
        if doc.name.trim().is_empty() {
            return Err(AppError::Validation("Project name is required".to_string()));
        }
        let root = self.projects_root(username)?;
        let slug = slugify(&doc.name);
        if StoredProject::locate(&root, &slug).is_some() {
            return Err(AppError::Conflict(format!("Project {} already exists", slug)));
        }

        let dir = root.join(&slug);
        let meta = codec::write_new(&dir, doc, &slug)?;
        self.init_history(&dir);
        tracing::info!(user = %username, project = %slug, "created project");
        Ok(meta)
    }

    pub fn get(&self, username: &str, id: &str) -> AppResult<WorldDocument> {
        self.locate(username, id)?.read()
    }

    /// Full overwrite. A legacy project is converted to the current layout.
    pub fn update(&self, username: &str, id: &str, doc: &WorldDocument) -> AppResult<ProjectMeta> {
        let meta = match self.locate(username, id)? {
            StoredProject::Current(dir) => codec::write_update(&dir, doc)?,
            stored @ StoredProject::Legacy(_) => self.migrate_with(username, id, &stored, doc)?,
        };
        tracing::info!(user = %username, project = %id, "updated project");
        Ok(meta)
    }

    pub fn delete(&self, username: &str, id: &str) -> AppResult<()> {
        match self.locate(username, id)? {
            StoredProject::Current(dir) => fs::remove_dir_all(&dir)?,
            StoredProject::Legacy(path) => fs::remove_file(&path)?,
        }
        tracing::info!(user = %username, project = %id, "deleted project");
        Ok(())
    }

    /// Converts every legacy flat file of `username` into a project directory.
    pub fn migrate_legacy(&self, username: &str) -> AppResult<Vec<ProjectMeta>> {
        let root = self.projects_root(username)?;
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut migrated = Vec::new();
        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            if !is_legacy_file(&path) {
                continue;
            }
            let Some(id) = legacy_id(&path) else {
                continue;
            };
            if root.join(&id).exists() {
                tracing::warn!(user = %username, project = %id, "legacy file shadowed by project directory; leaving it in place");
                continue;
            }
            let stored = StoredProject::Legacy(path);
            let doc = stored.read()?;
            migrated.push(self.migrate_with(username, &id, &stored, &doc)?);
        }
        Ok(migrated)
    }

    pub fn git_init(&self, username: &str, id: &str) -> AppResult<String> {
        self.vcs.init(&self.project_dir(username, id)?)
    }

    pub fn git_status(&self, username: &str, id: &str) -> AppResult<Vec<GitChange>> {
        self.vcs.status(&self.project_dir(username, id)?)
    }

    pub fn git_commit(&self, username: &str, id: &str, message: &str) -> AppResult<String> {
        self.vcs.commit(&self.project_dir(username, id)?, message)
    }

    pub fn git_log(&self, username: &str, id: &str) -> AppResult<Vec<GitLogEntry>> {
        self.vcs.log(&self.project_dir(username, id)?)
    }

    /// Directory of a current-layout project; version history needs one.
    pub fn project_dir(&self, username: &str, id: &str) -> AppResult<PathBuf> {
        match self.locate(username, id)? {
            StoredProject::Current(dir) => Ok(dir),
            StoredProject::Legacy(_) => Err(AppError::NotFound(format!(
                "Project {} is in the legacy format; save it once to enable history",
                id
            ))),
        }
    }

    fn locate(&self, username: &str, id: &str) -> AppResult<StoredProject> {
        let root = self.projects_root(username)?;
        if validate_component(id, "project id").is_err() {
            return Err(AppError::NotFound(format!("Project {} not found", id)));
        }
        StoredProject::locate(&root, id).ok_or_else(|| AppError::NotFound(format!("Project {} not found", id)))
    }

    fn migrate_with(
        &self,
        username: &str,
        id: &str,
        stored: &StoredProject,
        doc: &WorldDocument,
    ) -> AppResult<ProjectMeta> {
        let StoredProject::Legacy(path) = stored else {
            return Err(AppError::Internal(format!("Project {} is not in the legacy format", id)));
        };
        let previous = stored.read_meta()?;
        let mut doc = doc.clone();
        doc.created_at = doc.created_at.or(Some(previous.created_at));
        if doc.name.trim().is_empty() {
            doc.name = previous.name;
        }

        let dir = self.projects_root(username)?.join(id);
        let meta = codec::write_new(&dir, &doc, id)?;
        fs::remove_file(path)?;
        self.init_history(&dir);
        tracing::info!(user = %username, project = %id, "migrated legacy project");
        Ok(meta)
    }

    /// Best effort: a project without git is still a valid project.
    fn init_history(&self, dir: &Path) {
        let result = self
            .vcs
            .init(dir)
            .and_then(|_| self.vcs.commit(dir, INITIAL_COMMIT_MESSAGE));
        if let Err(error) = result {
            tracing::warn!(
                project = %dir.to_string_lossy(),
                error = %error,
                "version control setup failed; continuing without history"
            );
        }
    }
}

fn is_legacy_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|value| value.to_str()) == Some(LEGACY_EXTENSION)
}

fn legacy_id(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|value| value.to_str())
        .filter(|id| validate_component(id, "project id").is_ok())
        .map(str::to_string)
}

fn legacy_meta(path: &Path, doc: &WorldDocument) -> ProjectMeta {
    let id = legacy_id(path).unwrap_or_default();
    let modified = fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map(|time| DateTime::<Utc>::from(time).timestamp_millis())
        .unwrap_or(0);
    let last_modified = doc.last_modified.unwrap_or(modified);
    ProjectMeta {
        version: FORMAT_VERSION.to_string(),
        name: if doc.name.trim().is_empty() { id.clone() } else { doc.name.clone() },
        slug: id.clone(),
        id,
        framework_id: doc.framework_id.clone(),
        current_time_setting: doc.current_time_setting.clone(),
        created_at: doc.created_at.unwrap_or(last_modified),
        last_modified,
    }
}
