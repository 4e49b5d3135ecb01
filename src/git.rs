use crate::errors::{AppError, AppResult};
use crate::models::{GitChange, GitLogEntry};
use std::fs;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use wait_timeout::ChildExt;

pub const DEFAULT_COMMIT_MESSAGE: &str = "Update";
pub const LOG_LIMIT: usize = 10;

pub const DEFAULT_GITIGNORE: &str = "\
# Temporary files
*.tmp
*.bak

# OS metadata
.DS_Store
Thumbs.db
desktop.ini

# Lock files
*.lock
package-lock.json

# Logs
*.log
logs/
";

/// Per-project version history. Implementations must treat a directory without
/// a repository as empty for `status` and `log`.
pub trait VersionControl: Send + Sync {
    fn init(&self, project_dir: &Path) -> AppResult<String>;
    fn status(&self, project_dir: &Path) -> AppResult<Vec<GitChange>>;
    fn commit(&self, project_dir: &Path, message: &str) -> AppResult<String>;
    fn log(&self, project_dir: &Path) -> AppResult<Vec<GitLogEntry>>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    bin: String,
    timeout: Duration,
    author_name: String,
    author_email: String,
}

struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl GitCli {
    pub fn new(timeout: Duration, author_name: impl Into<String>, author_email: impl Into<String>) -> Self {
        Self {
            bin: "git".to_string(),
            timeout,
            author_name: author_name.into(),
            author_email: author_email.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        Command::new(&self.bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn run(&self, project_dir: &Path, args: &[&str]) -> AppResult<GitOutput> {
        let mut command = Command::new(&self.bin);
        command
            .args(args)
            .current_dir(project_dir)
            .env("GIT_TERMINAL_PROMPT", "0");
        // Repository discovery must never climb out of the project directory.
        if let Some(parent) = fs::canonicalize(project_dir)
            .ok()
            .and_then(|dir| dir.parent().map(Path::to_path_buf))
        {
            command.env("GIT_CEILING_DIRECTORIES", parent);
        }
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|error| AppError::Io(format!("failed to spawn git: {}", error)))?;

        // Drain pipes on helper threads so a chatty child can't block on a full buffer.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();
        let stdout_reader = std::thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Some(pipe) = stdout_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buffer);
            }
            buffer
        });
        let stderr_reader = std::thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_end(&mut buffer);
            }
            buffer
        });

        let status = match child.wait_timeout(self.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AppError::Io(format!(
                    "git {} timed out after {}ms",
                    subcommand(args),
                    self.timeout.as_millis()
                )));
            }
            Err(error) => return Err(AppError::Io(error.to_string())),
        };

        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();
        Ok(GitOutput {
            success: status.success(),
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
        })
    }

    fn run_checked(&self, project_dir: &Path, args: &[&str]) -> AppResult<String> {
        let output = self.run(project_dir, args)?;
        if !output.success {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            return Err(AppError::Io(format!("git {} failed: {}", subcommand(args), detail)));
        }
        Ok(output.stdout)
    }
}

impl VersionControl for GitCli {
    fn init(&self, project_dir: &Path) -> AppResult<String> {
        self.run_checked(project_dir, &["init"])?;
        let ignore = project_dir.join(".gitignore");
        if !ignore.exists() {
            fs::write(&ignore, DEFAULT_GITIGNORE).map_err(|error| AppError::Io(error.to_string()))?;
        }
        Ok("Git repository initialized".to_string())
    }

    fn status(&self, project_dir: &Path) -> AppResult<Vec<GitChange>> {
        if !is_repository(project_dir) {
            return Ok(Vec::new());
        }
        let stdout = self.run_checked(project_dir, &["status", "--porcelain", "-z"])?;
        Ok(parse_porcelain(&stdout))
    }

    fn commit(&self, project_dir: &Path, message: &str) -> AppResult<String> {
        if !is_repository(project_dir) {
            return Err(AppError::Io(format!(
                "{} is not a git repository",
                project_dir.to_string_lossy()
            )));
        }
        let message = if message.trim().is_empty() {
            DEFAULT_COMMIT_MESSAGE
        } else {
            message
        };
        self.run_checked(project_dir, &["add", "-A"])?;
        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        self.run_checked(
            project_dir,
            &["-c", &name, "-c", &email, "commit", "-m", message],
        )?;
        Ok("Changes committed".to_string())
    }

    fn log(&self, project_dir: &Path) -> AppResult<Vec<GitLogEntry>> {
        if !is_repository(project_dir) {
            return Ok(Vec::new());
        }
        let limit = format!("-n{}", LOG_LIMIT);
        let output = self.run(
            project_dir,
            &["log", &limit, "--pretty=format:%H%x1f%an%x1f%s%x1f%aI%x1e"],
        )?;
        // An unborn branch makes `git log` fail; there is simply no history yet.
        if !output.success {
            tracing::debug!(
                project = %project_dir.to_string_lossy(),
                stderr = %output.stderr.trim(),
                "git log unavailable; reporting empty history"
            );
            return Ok(Vec::new());
        }
        Ok(parse_log(&output.stdout))
    }
}

fn subcommand<'a>(args: &[&'a str]) -> &'a str {
    args.iter()
        .copied()
        .find(|arg| !arg.starts_with('-') && !arg.contains('='))
        .unwrap_or("")
}

pub fn is_repository(project_dir: &Path) -> bool {
    project_dir.join(".git").exists()
}

/// Parses `git status --porcelain -z`. Rename and copy records carry their
/// source path as an extra NUL-separated field, which is skipped.
pub fn parse_porcelain(raw: &str) -> Vec<GitChange> {
    let mut changes = Vec::new();
    let mut fields = raw.split('\0').filter(|field| !field.is_empty());
    while let Some(field) = fields.next() {
        if field.len() < 4 {
            continue;
        }
        let code = &field[..2];
        let path = &field[3..];
        let status = if code.contains('?') { "??".to_string() } else { code.to_string() };
        if code.starts_with('R') || code.starts_with('C') {
            fields.next();
        }
        changes.push(GitChange {
            status,
            path: path.to_string(),
        });
    }
    changes
}

pub fn parse_log(raw: &str) -> Vec<GitLogEntry> {
    raw.split('\u{1e}')
        .map(|record| record.trim_matches(|ch| ch == '\n' || ch == '\r'))
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let mut parts = record.split('\u{1f}');
            let hash = parts.next()?;
            let author = parts.next()?;
            let message = parts.next()?;
            let date = parts.next()?;
            Some(GitLogEntry {
                hash: hash.chars().take(7).collect(),
                author: author.to_string(),
                message: message.to_string(),
                date: date.to_string(),
            })
        })
        .take(LOG_LIMIT)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_porcelain_codes_and_paths() {
        let raw = " M project.json\0?? stories/segments/s-1.md\0A  world/entities.json\0";
        let changes = parse_porcelain(raw);
        assert_eq!(
            changes,
            vec![
                GitChange { status: " M".to_string(), path: "project.json".to_string() },
                GitChange { status: "??".to_string(), path: "stories/segments/s-1.md".to_string() },
                GitChange { status: "A ".to_string(), path: "world/entities.json".to_string() },
            ]
        );
    }

    #[test]
    fn porcelain_skips_rename_sources() {
        let raw = "R  artifacts/items/new.md\0artifacts/items/old.md\0 D context.md\0";
        let changes = parse_porcelain(raw);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].path, "artifacts/items/new.md");
        assert_eq!(changes[1].status, " D");
    }

    #[test]
    fn parses_log_records() {
        let raw = "0123456789abcdef\u{1f}Mira\u{1f}Add chapter two\u{1f}2026-01-02T03:04:05+00:00\u{1e}\n\
                   fedcba9876543210\u{1f}Tor\u{1f}Initial commit\u{1f}2026-01-01T00:00:00+00:00\u{1e}";
        let logs = parse_log(raw);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].hash, "0123456");
        assert_eq!(logs[0].author, "Mira");
        assert_eq!(logs[0].message, "Add chapter two");
        assert_eq!(logs[1].date, "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn empty_log_output_is_empty_history() {
        assert!(parse_log("").is_empty());
    }

    #[test]
    fn status_and_log_on_non_repository_are_empty() {
        let root = tempfile::tempdir().expect("temp dir");
        let git = GitCli::new(Duration::from_secs(5), "tester", "tester@localhost");
        assert!(git.status(root.path()).expect("status").is_empty());
        assert!(git.log(root.path()).expect("log").is_empty());
    }

    #[test]
    fn commit_outside_a_repository_is_refused() {
        let root = tempfile::tempdir().expect("temp dir");
        let git = GitCli::new(Duration::from_secs(5), "tester", "tester@localhost");
        let error = git.commit(root.path(), "oops").expect_err("no repository");
        assert_eq!(error.status_code(), 500);
        assert!(error.to_string().contains("not a git repository"));
    }
}
