use crate::errors::{AppError, AppResult};
use crate::models::FORMAT_VERSION;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

/// Sub-directories every project carries, created before any file is written.
pub const PROJECT_DIRS: &[&str] = &["world", "stories/segments", "artifacts/items", "agents"];

pub const MANIFEST_FILE: &str = "project.json";
pub const CONTEXT_FILE: &str = "context.md";
pub const CHRONICLE_FILE: &str = "chronicle.md";
pub const ENTITIES_FILE: &str = "world/entities.json";
pub const RELATIONSHIPS_FILE: &str = "world/relationships.json";
pub const ENTITY_STATES_FILE: &str = "world/entity-states.json";
pub const TECHNOLOGIES_FILE: &str = "world/technologies.json";
pub const TECH_DEPENDENCIES_FILE: &str = "world/tech-dependencies.json";
pub const STORIES_DIR: &str = "stories";
pub const SEGMENT_INDEX_FILE: &str = "stories/_index.json";
pub const SEGMENTS_DIR: &str = "stories/segments";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const ARTIFACT_INDEX_FILE: &str = "artifacts/_index.json";
pub const ARTIFACT_ITEMS_DIR: &str = "artifacts/items";
pub const AGENTS_FILE: &str = "agents/agents.json";
pub const WORKFLOW_FILE: &str = "agents/workflow.json";

pub fn scaffold(project_dir: &Path) -> AppResult<()> {
    fs::create_dir_all(project_dir).map_err(|error| AppError::Io(error.to_string()))?;
    for rel in PROJECT_DIRS {
        fs::create_dir_all(project_dir.join(rel)).map_err(|error| AppError::Io(error.to_string()))?;
    }
    Ok(())
}

/// Rejects values that would escape their parent directory when used as a path component.
pub fn validate_component(value: &str, what: &str) -> AppResult<()> {
    let invalid = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0']);
    if invalid {
        return Err(AppError::Validation(format!("Invalid {}: {:?}", what, value)));
    }
    Ok(())
}

pub fn user_root(data_dir: &Path, username: &str) -> PathBuf {
    data_dir.join("users").join(username)
}

pub fn projects_root(data_dir: &Path, username: &str) -> PathBuf {
    user_root(data_dir, username).join("projects")
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|error| AppError::Io(error.to_string()))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(path, bytes).map_err(|error| AppError::Io(error.to_string()))
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> AppResult<T> {
    let bytes = fs::read(path)
        .map_err(|error| AppError::Io(format!("{}: {}", path.to_string_lossy(), error)))?;
    serde_json::from_slice(&bytes)
        .map_err(|error| AppError::Io(format!("{}: {}", path.to_string_lossy(), error)))
}

/// Writes `{version, lastModified, <key>: items}`.
pub fn write_collection<T: Serialize>(path: &Path, key: &str, items: &T) -> AppResult<()> {
    let mut envelope = json!({
        "version": FORMAT_VERSION,
        "lastModified": now_millis(),
    });
    envelope[key] = serde_json::to_value(items)?;
    write_json_file(path, &envelope)
}

/// Reads a collection file and unwraps its inner list; a missing key reads as empty.
pub fn read_collection<T: DeserializeOwned>(path: &Path, key: &str) -> AppResult<Vec<T>> {
    let mut envelope: Value = read_json_file(path)?;
    match envelope.get_mut(key).map(Value::take) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(items) => serde_json::from_value(items)
            .map_err(|error| AppError::Io(format!("{}: {}", path.to_string_lossy(), error))),
    }
}

pub fn read_text_file(path: &Path) -> AppResult<String> {
    fs::read_to_string(path)
        .map_err(|error| AppError::Io(format!("{}: {}", path.to_string_lossy(), error)))
}

pub fn write_text_file(path: &Path, content: &str) -> AppResult<()> {
    fs::write(path, content)
        .map_err(|error| AppError::Io(format!("{}: {}", path.to_string_lossy(), error)))
}

/// Removes every entry inside `dir`, leaving the directory itself in place.
pub fn clear_dir(dir: &Path) -> AppResult<()> {
    if !dir.exists() {
        return fs::create_dir_all(dir).map_err(|error| AppError::Io(error.to_string()));
    }
    for entry in fs::read_dir(dir).map_err(|error| AppError::Io(error.to_string()))? {
        let path = entry.map_err(|error| AppError::Io(error.to_string()))?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(|error| AppError::Io(error.to_string()))?;
        } else {
            fs::remove_file(&path).map_err(|error| AppError::Io(error.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn temp_root() -> tempfile::TempDir {
        tempfile::tempdir().expect("temp workspace root")
    }

    fn dir_set(root: &Path) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir).expect("read dir") {
                let path = entry.expect("entry").path();
                if path.is_dir() {
                    out.insert(path.strip_prefix(root).expect("prefix").to_string_lossy().to_string());
                    stack.push(path);
                }
            }
        }
        out
    }

    #[test]
    fn scaffold_creates_fixed_skeleton() {
        let root = temp_root();
        let project = root.path().join("my-world");
        scaffold(&project).expect("scaffold");
        for rel in PROJECT_DIRS {
            assert!(project.join(rel).is_dir(), "missing {}", rel);
        }
    }

    #[test]
    fn scaffold_is_idempotent() {
        let root = temp_root();
        let project = root.path().join("my-world");
        scaffold(&project).expect("first scaffold");
        let first = dir_set(&project);
        scaffold(&project).expect("second scaffold");
        assert_eq!(first, dir_set(&project));
    }

    #[test]
    fn rejects_traversal_components() {
        assert!(validate_component("..", "project id").is_err());
        assert!(validate_component("a/b", "project id").is_err());
        assert!(validate_component("a\\b", "project id").is_err());
        assert!(validate_component("", "project id").is_err());
        assert!(validate_component("my-world", "project id").is_ok());
    }

    #[test]
    fn collection_envelope_roundtrip() {
        let root = temp_root();
        let path = root.path().join("world/entities.json");
        write_collection(&path, "entities", &vec![json!({"id": "e1"}), json!({"id": "e2"})])
            .expect("write collection");

        let raw: Value = read_json_file(&path).expect("raw envelope");
        assert_eq!(raw["version"], FORMAT_VERSION);
        assert!(raw["lastModified"].is_i64());

        let items: Vec<Value> = read_collection(&path, "entities").expect("read collection");
        assert_eq!(items, vec![json!({"id": "e1"}), json!({"id": "e2"})]);
    }

    #[test]
    fn clear_dir_keeps_directory() {
        let root = temp_root();
        let dir = root.path().join("segments");
        fs::create_dir_all(dir.join("nested")).expect("mkdir");
        fs::write(dir.join("a.md"), "a").expect("write");
        clear_dir(&dir).expect("clear");
        assert!(dir.is_dir());
        assert_eq!(fs::read_dir(&dir).expect("read dir").count(), 0);
    }
}
