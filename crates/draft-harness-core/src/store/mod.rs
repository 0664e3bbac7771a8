//! Storage abstraction for Draft Harness.
//!
//! The [`Store`] trait defines every storage operation the ingestion and
//! generation pipeline needs, so the orchestrator can run against SQLite in
//! production and [`memory::InMemoryStore`] in tests.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    BlogPost, ContentRecord, NewPost, NewSession, NewSource, NormalizedRecord, PostUpdate,
    Revision, RevisionSource, Session, SessionConfigUpdate, Source,
};

/// Abstract storage backend for Draft Harness.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_session`](Store::create_session) | Create a writing session |
/// | [`update_session_config`](Store::update_session_config) | Change tone/format/provider defaults |
/// | [`delete_session`](Store::delete_session) | Delete a session with its posts, revisions, attachments |
/// | [`create_source`](Store::create_source) | Register a git or Notion source |
/// | [`attach_source`](Store::attach_source) | Attach a source to a session |
/// | [`upsert_content`](Store::upsert_content) | Insert or update records by `(source, external id)` |
/// | [`list_session_content`](Store::list_session_content) | Stored records of all attached sources, oldest first |
/// | [`create_post`](Store::create_post) | Persist a draft plus revision 1 |
/// | [`update_post`](Store::update_post) | Replace a post's state and append a revision |
/// | [`list_revisions`](Store::list_revisions) | Revision history, oldest first |
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_session(&self, new: &NewSession) -> Result<Session>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    /// All sessions, most recently updated first.
    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Apply a partial update. Returns `None` if the session does not exist.
    async fn update_session_config(
        &self,
        id: &str,
        update: &SessionConfigUpdate,
    ) -> Result<Option<Session>>;

    /// Delete a session and cascade to its posts, revisions and attachments.
    ///
    /// Returns `false` if nothing was deleted.
    async fn delete_session(&self, id: &str) -> Result<bool>;

    async fn create_source(&self, new: &NewSource) -> Result<Source>;

    /// Look a source up by id, falling back to its unique name.
    async fn find_source(&self, id_or_name: &str) -> Result<Option<Source>>;

    async fn list_sources(&self) -> Result<Vec<Source>>;

    /// Attach a source to a session. Attaching twice is a no-op.
    async fn attach_source(&self, session_id: &str, source_id: &str) -> Result<()>;

    /// Returns `false` if the source was not attached.
    async fn detach_source(&self, session_id: &str, source_id: &str) -> Result<bool>;

    /// Sources attached to a session, in attachment order.
    async fn list_session_sources(&self, session_id: &str) -> Result<Vec<Source>>;

    /// Insert or update records for one source, keyed by external id.
    ///
    /// An existing row keeps its id and `created_at`. Returns the number of
    /// records written.
    async fn upsert_content(&self, source_id: &str, records: &[NormalizedRecord])
        -> Result<usize>;

    /// Stored records of every source attached to the session, ordered by
    /// `occurred_at` ascending (unknown last), then `created_at`, then
    /// insertion order.
    async fn list_session_content(&self, session_id: &str) -> Result<Vec<ContentRecord>>;

    /// Persist a new post and its first `"generated"` revision.
    async fn create_post(&self, new: &NewPost) -> Result<BlogPost>;

    async fn get_post(&self, id: &str) -> Result<Option<BlogPost>>;

    /// Posts, newest first, optionally restricted to one session.
    async fn list_posts(&self, session_id: Option<&str>) -> Result<Vec<BlogPost>>;

    /// Replace the post's current state and append a revision with the next
    /// version number. Returns `None` if the post does not exist.
    async fn update_post(
        &self,
        id: &str,
        update: &PostUpdate,
        source: RevisionSource,
    ) -> Result<Option<BlogPost>>;

    /// Revisions of a post ordered by version ascending.
    async fn list_revisions(&self, post_id: &str) -> Result<Vec<Revision>>;
}

/// Sort key shared by the backends for [`Store::list_session_content`].
pub fn content_order(a: &ContentRecord, b: &ContentRecord) -> std::cmp::Ordering {
    match (a.occurred_at, b.occurred_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    }
    .then_with(|| a.created_at.cmp(&b.created_at))
}
