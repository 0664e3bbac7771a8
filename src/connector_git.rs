//! Git commit-log connector.
//!
//! Turns the commit history of a repository into [`RawRecord`]s, one per
//! commit, oldest first.
//!
//! Workflow:
//! 1. Use `repo` directly when it is a local checkout; otherwise clone it
//!    into the cache directory (or fetch + reset an existing clone).
//! 2. Run `git log --reverse` with unit/record separators in the format
//!    string so subjects and bodies can contain any text.
//! 3. Record `hash`, `repoUrl` and `branch` in the metadata so citations
//!    can resolve to a commit URL.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Command;

use draft_harness_core::models::{RawRecord, RecordKind};

use crate::config::Config;

const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';
const LOG_FORMAT: &str = "--format=%H%x1f%an%x1f%aI%x1f%s%x1f%b%x1e";

/// Adapter config stored on a git source.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GitSourceConfig {
    /// Local path or clone URL.
    pub repo: String,
    #[serde(default)]
    pub branch: Option<String>,
    /// Only the most recent N commits are read.
    #[serde(default)]
    pub max_commits: Option<usize>,
}

impl GitSourceConfig {
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone()).with_context(|| "Invalid git source config")
    }
}

/// Read the commit log of a git source.
pub fn scan_git(config: &Config, source: &GitSourceConfig) -> Result<Vec<RawRecord>> {
    let (repo_dir, repo_url) = if is_local_repo(&source.repo) {
        let dir = PathBuf::from(&source.repo);
        let url = git_remote_url(&dir);
        (dir, url)
    } else {
        let cache_dir = config.git_cache_dir().join(short_hash(&source.repo));
        let branch = source.branch.as_deref();
        if cache_dir.join(".git").exists() {
            git_pull(&cache_dir, branch)?;
        } else {
            git_clone(&source.repo, branch, &cache_dir)?;
        }
        (cache_dir, Some(source.repo.clone()))
    };

    let mut cmd = Command::new("git");
    cmd.arg("log").arg("--reverse").arg(LOG_FORMAT);
    if let Some(max) = source.max_commits {
        cmd.arg(format!("--max-count={}", max));
    }
    if let Some(branch) = &source.branch {
        cmd.arg(branch);
    }
    let output = cmd
        .current_dir(&repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git log'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git log failed in {}: {}", repo_dir.display(), stderr.trim());
    }

    let log = String::from_utf8_lossy(&output.stdout);
    Ok(parse_log(&log, repo_url.as_deref(), source.branch.as_deref()))
}

/// Parse `git log` output produced with [`LOG_FORMAT`].
pub fn parse_log(log: &str, repo_url: Option<&str>, branch: Option<&str>) -> Vec<RawRecord> {
    log.split(RECORD_SEP)
        .filter_map(|entry| {
            let entry = entry.trim_start_matches(['\n', '\r']);
            let mut fields = entry.splitn(5, FIELD_SEP);
            let hash = fields.next()?.trim();
            if hash.is_empty() {
                return None;
            }
            let author = fields.next().unwrap_or("").trim();
            let date = fields.next().unwrap_or("").trim();
            let subject = fields.next().unwrap_or("");
            let body = fields.next().unwrap_or("");

            let mut metadata = serde_json::json!({ "hash": hash });
            if let Some(url) = repo_url {
                metadata["repoUrl"] = serde_json::json!(url);
            }
            if let Some(branch) = branch {
                metadata["branch"] = serde_json::json!(branch);
            }

            Some(RawRecord {
                external_id: hash.to_string(),
                kind: RecordKind::Commit,
                title: subject.to_string(),
                body: body.to_string(),
                author: (!author.is_empty()).then(|| author.to_string()),
                occurred_at: DateTime::parse_from_rfc3339(date)
                    .ok()
                    .map(|d| d.with_timezone(&Utc)),
                metadata,
            })
        })
        .collect()
}

fn is_local_repo(repo: &str) -> bool {
    let path = Path::new(repo);
    path.is_dir() && (path.join(".git").exists() || path.join("HEAD").is_file())
}

fn git_remote_url(repo_dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["config", "--get", "remote.origin.url"])
        .current_dir(repo_dir)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!url.is_empty()).then_some(url)
}

/// Clone `branch`, or the remote's default branch when none is given.
fn git_clone(url: &str, branch: Option<&str>, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create cache directory: {}", dest.display()))?;

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--single-branch"]);
    if let Some(branch) = branch {
        cmd.args(["--branch", branch]);
    }
    let output = cmd
        .arg(url)
        .arg(dest)
        .output()
        .with_context(|| "Failed to execute 'git clone'. Is git installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git clone failed: {}", stderr.trim());
    }

    Ok(())
}

/// Fetch `branch` (or the tracked branch) and hard-reset onto it.
fn git_pull(repo_dir: &Path, branch: Option<&str>) -> Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(["fetch", "origin"]);
    if let Some(branch) = branch {
        cmd.arg(branch);
    }
    let output = cmd
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git fetch'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git fetch failed: {}", stderr.trim());
    }

    let output = Command::new("git")
        .args(["reset", "--hard", "FETCH_HEAD"])
        .current_dir(repo_dir)
        .output()
        .with_context(|| "Failed to execute 'git reset'")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git reset failed: {}", stderr.trim());
    }

    Ok(())
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "Kim")
            .env("GIT_AUTHOR_EMAIL", "kim@example.com")
            .env("GIT_COMMITTER_NAME", "Kim")
            .env("GIT_COMMITTER_EMAIL", "kim@example.com")
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn remote_without_branch_follows_default_branch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let upstream = tmp.path().join("upstream");
        std::fs::create_dir_all(&upstream).unwrap();
        git(&upstream, &["init", "-q"]);
        git(&upstream, &["symbolic-ref", "HEAD", "refs/heads/trunk"]);
        git(&upstream, &["commit", "-q", "--allow-empty", "-m", "Initial import"]);

        let config = Config::with_db_path(tmp.path().join("data").join("draft.sqlite"));
        let source = GitSourceConfig {
            repo: format!("file://{}", upstream.display()),
            branch: None,
            max_commits: None,
        };
        let records = scan_git(&config, &source).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "Initial import");
        assert_eq!(records[0].metadata["repoUrl"], source.repo.as_str());

        // The second scan reuses the cached clone.
        git(&upstream, &["commit", "-q", "--allow-empty", "-m", "Add CSV export"]);
        let records = scan_git(&config, &source).unwrap();
        let titles: Vec<&str> = records.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Initial import", "Add CSV export"]);
    }

    #[test]
    fn parses_multiline_bodies_and_metadata() {
        let log = "abc123\u{1f}Kim\u{1f}2024-03-01T09:00:00+09:00\u{1f}Fix login\u{1f}line one\nline two\n\u{1e}\n\
                   def456\u{1f}Lee\u{1f}2024-03-02T10:00:00+00:00\u{1f}Add export\u{1f}\u{1e}\n";
        let records = parse_log(log, Some("git@github.com:acme/api.git"), Some("main"));
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.external_id, "abc123");
        assert_eq!(first.title, "Fix login");
        assert_eq!(first.body, "line one\nline two\n");
        assert_eq!(first.author.as_deref(), Some("Kim"));
        assert_eq!(
            first.occurred_at.unwrap().to_rfc3339(),
            "2024-03-01T00:00:00+00:00"
        );
        assert_eq!(first.metadata["hash"], "abc123");
        assert_eq!(first.metadata["repoUrl"], "git@github.com:acme/api.git");
        assert_eq!(first.metadata["branch"], "main");

        assert_eq!(records[1].body, "");
    }

    #[test]
    fn tolerates_bad_dates_and_missing_remote() {
        let log = "abc\u{1f}\u{1f}not-a-date\u{1f}subject\u{1f}body\u{1e}";
        let records = parse_log(log, None, None);
        assert_eq!(records.len(), 1);
        assert!(records[0].occurred_at.is_none());
        assert!(records[0].author.is_none());
        assert!(records[0].metadata.get("repoUrl").is_none());
    }

    #[test]
    fn source_config_from_json() {
        let cfg = GitSourceConfig::from_json(&serde_json::json!({
            "repo": "https://github.com/acme/api.git",
            "maxCommits": 50
        }))
        .unwrap();
        assert_eq!(cfg.max_commits, Some(50));
        assert!(cfg.branch.is_none());
        assert!(GitSourceConfig::from_json(&serde_json::json!({})).is_err());
    }
}
