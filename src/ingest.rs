//! Ingestion pipeline orchestration.
//!
//! Coordinates one source sync: connector → normalization → storage.
//! Records are upserted by `(source, external id)`, so re-running an
//! ingest is idempotent apart from picking up new or edited records.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tracing::info;

use draft_harness_core::models::{RawRecord, Source, SourceKind};
use draft_harness_core::normalize::normalize;
use draft_harness_core::store::Store;

use crate::config::Config;
use crate::connector_git::{self, GitSourceConfig};
use crate::connector_notion::{self, NotionSourceConfig};

/// Pulls fresh records for a source into the store.
#[async_trait]
pub trait SourceIngestor: Send + Sync {
    /// Ingest one source and return the number of records written.
    async fn ingest_source(&self, source_id: &str) -> Result<usize>;
}

/// Connector-backed [`SourceIngestor`].
pub struct Ingestor {
    config: Config,
    store: Arc<dyn Store>,
}

impl Ingestor {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        Self { config, store }
    }

    /// Run the source's connector.
    pub async fn fetch(&self, source: &Source) -> Result<Vec<RawRecord>> {
        match source.kind {
            SourceKind::Git => {
                let git = GitSourceConfig::from_json(&source.config)?;
                let config = self.config.clone();
                tokio::task::spawn_blocking(move || connector_git::scan_git(&config, &git))
                    .await
                    .map_err(|e| anyhow!("git scan task failed: {}", e))?
            }
            SourceKind::Notion => {
                let notion = NotionSourceConfig::from_json(&source.config)?;
                connector_notion::scan_notion(&self.config.notion, &notion).await
            }
        }
    }
}

#[async_trait]
impl SourceIngestor for Ingestor {
    async fn ingest_source(&self, source_id: &str) -> Result<usize> {
        let source = self
            .store
            .find_source(source_id)
            .await?
            .ok_or_else(|| anyhow!("Unknown source: '{}'", source_id))?;

        let raw = self.fetch(&source).await?;
        let fetched = raw.len();
        let records = normalize(raw);
        let written = self.store.upsert_content(&source.id, &records).await?;

        info!(
            source = %source.name,
            kind = source.kind.as_str(),
            fetched,
            kept = records.len(),
            "ingested source"
        );
        Ok(written)
    }
}

/// `draft ingest <source>`: sync one source and print a summary.
pub async fn run_ingest(config: &Config, store: Arc<dyn Store>, source: &str) -> Result<()> {
    let found = store
        .find_source(source)
        .await?
        .ok_or_else(|| anyhow!("Unknown source: '{}'", source))?;

    let ingestor = Ingestor::new(config.clone(), store);
    let written = ingestor.ingest_source(&found.id).await?;

    println!("ingest {} ({})", found.name, found.kind.as_str());
    println!("  records written: {}", written);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use draft_harness_core::models::NewSource;
    use draft_harness_core::store::memory::InMemoryStore;
    use std::process::Command;

    fn git(dir: &std::path::Path, args: &[&str]) {
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

    #[tokio::test]
    async fn ingests_local_repository_idempotently() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "-q"]);
        git(&repo, &["commit", "-q", "--allow-empty", "-m", "Fix login redirect", "-m", "Users bounced back to /login."]);
        git(&repo, &["commit", "-q", "--allow-empty", "-m", "Add CSV export"]);

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let source = store
            .create_source(&NewSource {
                name: "api".to_string(),
                kind: SourceKind::Git,
                config: serde_json::json!({ "repo": repo.to_string_lossy() }),
            })
            .await
            .unwrap();

        let config = Config::with_db_path(tmp.path().join("draft.sqlite"));
        let ingestor = Ingestor::new(config, store.clone());
        assert_eq!(ingestor.ingest_source("api").await.unwrap(), 2);
        assert_eq!(ingestor.ingest_source(&source.id).await.unwrap(), 2);

        let session = store
            .create_session(&Default::default())
            .await
            .unwrap();
        store.attach_source(&session.id, &source.id).await.unwrap();
        let rows = store.list_session_content(&session.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].title, "Fix login redirect");
        assert_eq!(rows[0].body, "Users bounced back to /login.");
        assert_eq!(rows[1].title, "Add CSV export");
        assert!(rows[0].metadata["hash"].is_string());
    }

    #[tokio::test]
    async fn unknown_source_is_an_error() {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let ingestor = Ingestor::new(Config::with_db_path("/tmp/unused.sqlite"), store);
        assert!(ingestor.ingest_source("nope").await.is_err());
    }
}
