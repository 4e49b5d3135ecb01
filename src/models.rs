use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Version tag stamped on the manifest and on every sub-collection file.
pub const FORMAT_VERSION: &str = "1.0";

pub const DEFAULT_CONTEXT: &str = "# World Background\n\n";
pub const DEFAULT_CHRONICLE: &str = "# Chronicle\n\n";

/// The unit of persistence: everything a world-building project holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub framework_id: Option<String>,
    #[serde(default)]
    pub current_time_setting: Option<String>,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub last_modified: Option<i64>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub chronicle_text: Option<String>,
    #[serde(default)]
    pub model: WorldModel,
    #[serde(default)]
    pub story_segments: Vec<StorySegment>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub agents: Vec<Value>,
    #[serde(default)]
    pub workflow: Vec<Value>,
}

/// Record lists are opaque here; only their order matters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldModel {
    #[serde(default)]
    pub entities: Vec<Value>,
    #[serde(default)]
    pub relationships: Vec<Value>,
    #[serde(default)]
    pub entity_states: Vec<Value>,
    #[serde(default)]
    pub technologies: Vec<Value>,
    #[serde(default)]
    pub tech_dependencies: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorySegment {
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub influenced_by: Vec<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub source_step_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub content: String,
}

impl Artifact {
    pub fn file_extension(&self) -> &'static str {
        if self.kind == "json" {
            "json"
        } else {
            "md"
        }
    }
}

/// Contents of `project.json`; the only file read when listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMeta {
    pub version: String,
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub framework_id: Option<String>,
    #[serde(default)]
    pub current_time_setting: Option<String>,
    pub created_at: i64,
    pub last_modified: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentIndexEntry {
    pub id: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub influenced_by: Vec<String>,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactIndexEntry {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub source_step_id: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitChange {
    pub status: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLogEntry {
    pub hash: String,
    pub author: String,
    pub message: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectResponse {
    pub success: bool,
    pub project: ProjectMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitMessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitStatusResponse {
    pub changes: Vec<GitChange>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitLogResponse {
    pub logs: Vec<GitLogEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitRequest {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoAmIResponse {
    pub username: String,
}
