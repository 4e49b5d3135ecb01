//! Maps a [`WorldDocument`] onto the fixed multi-file project layout and back.
//!
//! Writes are whole-document overwrites. Story segments and artifacts are keyed
//! only by id: their directories are emptied and re-rendered on every write, so
//! entries dropped from the document disappear from disk. Nothing here is
//! transactional; a failure part way through leaves a partially updated tree.

use crate::errors::{AppError, AppResult};
use crate::models::{
    Artifact, ArtifactIndexEntry, ProjectMeta, SegmentIndexEntry, StorySegment, WorldDocument, WorldModel,
    DEFAULT_CHRONICLE, DEFAULT_CONTEXT, FORMAT_VERSION,
};
use crate::workspace::{
    clear_dir, now_millis, read_collection, read_json_file, read_text_file, scaffold, validate_component,
    write_collection, write_json_file, write_text_file, AGENTS_FILE, ARTIFACT_INDEX_FILE, ARTIFACT_ITEMS_DIR,
    CHRONICLE_FILE, CONTEXT_FILE, ENTITIES_FILE, ENTITY_STATES_FILE, MANIFEST_FILE, RELATIONSHIPS_FILE,
    ARTIFACTS_DIR, SEGMENTS_DIR, SEGMENT_INDEX_FILE, STORIES_DIR, TECHNOLOGIES_FILE, TECH_DEPENDENCIES_FILE,
    WORKFLOW_FILE,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::{Component, Path, PathBuf};

static FRONTMATTER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\A---\n.*?\n---\n\n?").expect("valid regex"));

/// Scaffolds `project_dir` and writes a brand-new project under `slug`.
pub fn write_new(project_dir: &Path, doc: &WorldDocument, slug: &str) -> AppResult<ProjectMeta> {
    validate_item_ids(doc)?;
    scaffold(project_dir)?;

    let now = now_millis();
    let meta = ProjectMeta {
        version: FORMAT_VERSION.to_string(),
        id: slug.to_string(),
        name: doc.name.clone(),
        slug: slug.to_string(),
        framework_id: doc.framework_id.clone(),
        current_time_setting: doc.current_time_setting.clone(),
        created_at: doc.created_at.unwrap_or(now),
        last_modified: now,
    };
    write_json_file(&project_dir.join(MANIFEST_FILE), &meta)?;
    write_contents(project_dir, doc)?;
    Ok(meta)
}

/// Overwrites an existing project. Identity fields in the manifest are kept.
pub fn write_update(project_dir: &Path, doc: &WorldDocument) -> AppResult<ProjectMeta> {
    validate_item_ids(doc)?;

    let manifest_path = project_dir.join(MANIFEST_FILE);
    let mut meta: ProjectMeta = read_json_file(&manifest_path)?;
    if !doc.name.trim().is_empty() {
        meta.name = doc.name.clone();
    }
    meta.framework_id = doc.framework_id.clone();
    meta.current_time_setting = doc.current_time_setting.clone();
    meta.last_modified = now_millis();
    write_json_file(&manifest_path, &meta)?;

    write_contents(project_dir, doc)?;
    Ok(meta)
}

pub fn read_meta(project_dir: &Path) -> AppResult<ProjectMeta> {
    read_json_file(&project_dir.join(MANIFEST_FILE))
}

pub fn read(project_dir: &Path) -> AppResult<WorldDocument> {
    let meta = read_meta(project_dir)?;
    let context = read_text_file(&project_dir.join(CONTEXT_FILE))?;
    let chronicle_text = read_text_file(&project_dir.join(CHRONICLE_FILE))?;

    let model = WorldModel {
        entities: read_collection(&project_dir.join(ENTITIES_FILE), "entities")?,
        relationships: read_collection(&project_dir.join(RELATIONSHIPS_FILE), "relationships")?,
        entity_states: read_collection(&project_dir.join(ENTITY_STATES_FILE), "entityStates")?,
        technologies: read_collection(&project_dir.join(TECHNOLOGIES_FILE), "technologies")?,
        tech_dependencies: read_collection(&project_dir.join(TECH_DEPENDENCIES_FILE), "dependencies")?,
    };

    let segment_index: Vec<SegmentIndexEntry> =
        read_collection(&project_dir.join(SEGMENT_INDEX_FILE), "segments")?;
    let mut story_segments = Vec::with_capacity(segment_index.len());
    for entry in segment_index {
        validate_component(&entry.id, "segment id")?;
        let raw = read_text_file(&index_target(&project_dir.join(STORIES_DIR), &entry.file)?)?;
        story_segments.push(StorySegment {
            id: entry.id,
            timestamp: entry.timestamp,
            influenced_by: entry.influenced_by,
            content: strip_frontmatter(&raw).to_string(),
        });
    }

    let artifact_index: Vec<ArtifactIndexEntry> =
        read_collection(&project_dir.join(ARTIFACT_INDEX_FILE), "artifacts")?;
    let mut artifacts = Vec::with_capacity(artifact_index.len());
    for entry in artifact_index {
        validate_component(&entry.id, "artifact id")?;
        let content = read_text_file(&index_target(&project_dir.join(ARTIFACTS_DIR), &entry.file)?)?;
        artifacts.push(Artifact {
            id: entry.id,
            title: entry.title,
            kind: entry.kind,
            source_step_id: entry.source_step_id,
            created_at: entry.created_at,
            content,
        });
    }

    let agents: Vec<Value> = read_collection(&project_dir.join(AGENTS_FILE), "agents")?;
    let workflow: Vec<Value> = read_collection(&project_dir.join(WORKFLOW_FILE), "steps")?;

    Ok(WorldDocument {
        id: Some(meta.id),
        name: meta.name,
        framework_id: meta.framework_id,
        current_time_setting: meta.current_time_setting,
        created_at: Some(meta.created_at),
        last_modified: Some(meta.last_modified),
        context: Some(context),
        chronicle_text: Some(chronicle_text),
        model,
        story_segments,
        artifacts,
        agents,
        workflow,
    })
}

/// Removes a single leading frontmatter block, if present.
pub fn strip_frontmatter(raw: &str) -> &str {
    match FRONTMATTER.find(raw) {
        Some(found) => &raw[found.end()..],
        None => raw,
    }
}

/// Frontmatter values are JSON-encoded so a multi-line label can't close the
/// block early. Read takes these fields from the index, not from here.
pub fn render_segment(segment: &StorySegment) -> AppResult<String> {
    Ok(format!(
        "---\nid: {}\ntimestamp: {}\ninfluencedBy: {}\n---\n\n{}",
        serde_json::to_string(&segment.id)?,
        serde_json::to_string(&segment.timestamp)?,
        serde_json::to_string(&segment.influenced_by)?,
        segment.content
    ))
}

/// Resolves an index entry's `file` against the directory holding the index.
/// Only plain relative paths are accepted.
fn index_target(base: &Path, file: &str) -> AppResult<PathBuf> {
    let relative = Path::new(file);
    let plain = !file.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !plain {
        return Err(AppError::Io(format!("Index entry points outside the project: {:?}", file)));
    }
    Ok(base.join(relative))
}

fn segment_file_name(id: &str) -> String {
    format!("{}.md", id)
}

fn artifact_file_name(artifact: &Artifact) -> String {
    format!("{}.{}", artifact.id, artifact.file_extension())
}

fn validate_item_ids(doc: &WorldDocument) -> AppResult<()> {
    for segment in &doc.story_segments {
        validate_component(&segment.id, "segment id")?;
    }
    for artifact in &doc.artifacts {
        validate_component(&artifact.id, "artifact id")?;
    }
    Ok(())
}

fn write_contents(project_dir: &Path, doc: &WorldDocument) -> AppResult<()> {
    write_text_file(
        &project_dir.join(CONTEXT_FILE),
        doc.context.as_deref().unwrap_or(DEFAULT_CONTEXT),
    )?;
    write_text_file(
        &project_dir.join(CHRONICLE_FILE),
        doc.chronicle_text.as_deref().unwrap_or(DEFAULT_CHRONICLE),
    )?;

    let model = &doc.model;
    write_collection(&project_dir.join(ENTITIES_FILE), "entities", &model.entities)?;
    write_collection(&project_dir.join(RELATIONSHIPS_FILE), "relationships", &model.relationships)?;
    write_collection(&project_dir.join(ENTITY_STATES_FILE), "entityStates", &model.entity_states)?;
    write_collection(&project_dir.join(TECHNOLOGIES_FILE), "technologies", &model.technologies)?;
    write_collection(&project_dir.join(TECH_DEPENDENCIES_FILE), "dependencies", &model.tech_dependencies)?;

    write_segments(project_dir, &doc.story_segments)?;
    write_artifacts(project_dir, &doc.artifacts)?;

    write_collection(&project_dir.join(AGENTS_FILE), "agents", &doc.agents)?;
    write_collection(&project_dir.join(WORKFLOW_FILE), "steps", &doc.workflow)?;
    Ok(())
}

fn write_segments(project_dir: &Path, segments: &[StorySegment]) -> AppResult<()> {
    let index: Vec<SegmentIndexEntry> = segments
        .iter()
        .map(|segment| SegmentIndexEntry {
            id: segment.id.clone(),
            timestamp: segment.timestamp.clone(),
            influenced_by: segment.influenced_by.clone(),
            file: format!("segments/{}", segment_file_name(&segment.id)),
        })
        .collect();
    write_collection(&project_dir.join(SEGMENT_INDEX_FILE), "segments", &index)?;

    let dir = project_dir.join(SEGMENTS_DIR);
    clear_dir(&dir)?;
    for segment in segments {
        write_text_file(&dir.join(segment_file_name(&segment.id)), &render_segment(segment)?)?;
    }
    Ok(())
}

fn write_artifacts(project_dir: &Path, artifacts: &[Artifact]) -> AppResult<()> {
    let index: Vec<ArtifactIndexEntry> = artifacts
        .iter()
        .map(|artifact| ArtifactIndexEntry {
            id: artifact.id.clone(),
            title: artifact.title.clone(),
            kind: artifact.kind.clone(),
            source_step_id: artifact.source_step_id.clone(),
            created_at: artifact.created_at,
            file: format!("items/{}", artifact_file_name(artifact)),
        })
        .collect();
    write_collection(&project_dir.join(ARTIFACT_INDEX_FILE), "artifacts", &index)?;

    let dir = project_dir.join(ARTIFACT_ITEMS_DIR);
    clear_dir(&dir)?;
    for artifact in artifacts {
        write_text_file(&dir.join(artifact_file_name(artifact)), &artifact.content)?;
    }
    Ok(())
}
