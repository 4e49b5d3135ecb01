use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use worldforge_lib::git::{GitCli, VersionControl, DEFAULT_GITIGNORE};
use worldforge_lib::{ProjectStore, WorldDocument};

fn git() -> Option<GitCli> {
    let git = GitCli::new(Duration::from_secs(15), "tester", "tester@localhost");
    if git.is_available() {
        Some(git)
    } else {
        eprintln!("git binary not found; skipping");
        None
    }
}

#[test]
fn init_status_commit_log_cycle() {
    let Some(git) = git() else { return };
    let root = tempfile::tempdir().expect("temp project dir");
    let dir = root.path();
    fs::write(dir.join("project.json"), "{}").expect("seed file");

    assert!(git.status(dir).expect("status before init").is_empty());
    assert!(git.log(dir).expect("log before init").is_empty());

    git.init(dir).expect("init");
    assert_eq!(
        fs::read_to_string(dir.join(".gitignore")).expect("gitignore"),
        DEFAULT_GITIGNORE
    );
    assert!(git.log(dir).expect("log on unborn branch").is_empty());

    let changes = git.status(dir).expect("status");
    assert!(changes
        .iter()
        .any(|change| change.path == "project.json" && change.status == "??"));

    assert_eq!(git.commit(dir, "Seed world").expect("commit"), "Changes committed");
    assert!(git.status(dir).expect("clean status").is_empty());

    let logs = git.log(dir).expect("log");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "Seed world");
    assert_eq!(logs[0].author, "tester");
    assert_eq!(logs[0].hash.len(), 7);
}

#[test]
fn init_keeps_existing_gitignore() {
    let Some(git) = git() else { return };
    let root = tempfile::tempdir().expect("temp project dir");
    fs::write(root.path().join(".gitignore"), "custom\n").expect("custom ignore");
    git.init(root.path()).expect("init");
    assert_eq!(
        fs::read_to_string(root.path().join(".gitignore")).expect("gitignore"),
        "custom\n"
    );
}

#[test]
fn blank_message_commits_as_update() {
    let Some(git) = git() else { return };
    let root = tempfile::tempdir().expect("temp project dir");
    git.init(root.path()).expect("init");
    fs::write(root.path().join("notes.md"), "tides").expect("seed file");
    git.commit(root.path(), "   ").expect("commit");
    assert_eq!(git.log(root.path()).expect("log")[0].message, "Update");
}

#[test]
fn committing_a_clean_tree_fails() {
    let Some(git) = git() else { return };
    let root = tempfile::tempdir().expect("temp project dir");
    git.init(root.path()).expect("init");
    git.commit(root.path(), "first").expect("first commit");

    let error = git.commit(root.path(), "again").expect_err("nothing to commit");
    assert_eq!(error.status_code(), 500);
    assert!(error.to_string().starts_with("IO_FAILURE"));
}

#[test]
fn created_projects_start_with_history() {
    let Some(git) = git() else { return };
    let root = tempfile::tempdir().expect("temp data dir");
    let store = ProjectStore::new(root.path(), Arc::new(git));
    let doc = WorldDocument {
        name: "Glass Coast".to_string(),
        ..WorldDocument::default()
    };
    let meta = store.create("mira", &doc).expect("create");

    let logs = store.git_log("mira", &meta.id).expect("log");
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].message, "Initial commit");

    let mut edited = store.get("mira", &meta.id).expect("get");
    edited.context = Some("# World Background\n\nSalt flats.".to_string());
    store.update("mira", &meta.id, &edited).expect("update");
    let changes = store.git_status("mira", &meta.id).expect("status");
    assert!(changes.iter().any(|change| change.path == "context.md"));

    store.git_commit("mira", &meta.id, "Describe the coast").expect("commit");
    let logs = store.git_log("mira", &meta.id).expect("log");
    assert_eq!(logs[0].message, "Describe the coast");
    assert_eq!(logs.len(), 2);
}

fn outer_log(dir: &Path) -> String {
    let output = Command::new("git")
        .args(["log", "--all", "--name-only", "--pretty=format:%s"])
        .current_dir(dir)
        .output()
        .expect("outer git log");
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn uninitialized_project_never_touches_enclosing_repository() {
    let Some(git) = git() else { return };
    let outer = tempfile::tempdir().expect("outer checkout");
    git.init(outer.path()).expect("outer init");
    fs::write(outer.path().join("server-secret.txt"), "hunter2").expect("secret");

    let project = outer.path().join("data/users/mira/projects/world");
    fs::create_dir_all(&project).expect("project dir");
    fs::write(project.join("project.json"), "{}").expect("manifest");

    assert!(git.status(&project).expect("status").is_empty());
    assert!(git.log(&project).expect("log").is_empty());
    let error = git.commit(&project, "oops").expect_err("not a repository");
    assert!(error.to_string().starts_with("IO_FAILURE"));

    let history = outer_log(outer.path());
    assert!(!history.contains("oops"));
    assert!(!history.contains("server-secret.txt"));
}

#[test]
fn log_returns_ten_newest_commits() {
    let Some(git) = git() else { return };
    let root = tempfile::tempdir().expect("temp project dir");
    git.init(root.path()).expect("init");
    for round in 1..=12 {
        fs::write(root.path().join("chronicle.md"), format!("round {}", round)).expect("write");
        git.commit(root.path(), &format!("Round {}", round)).expect("commit");
    }

    let logs = git.log(root.path()).expect("log");
    assert_eq!(logs.len(), 10);
    let messages: Vec<String> = logs.iter().map(|entry| entry.message.clone()).collect();
    let expected: Vec<String> = (3..=12).rev().map(|round| format!("Round {}", round)).collect();
    assert_eq!(messages, expected);
    assert!(logs.iter().all(|entry| entry.hash.len() == 7));
}
