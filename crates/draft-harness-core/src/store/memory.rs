//! In-memory [`Store`] implementation for tests.
//!
//! Everything lives in one `State` behind a `std::sync::RwLock`. Rows are
//! kept in insertion order so the stable sorts below fall back to it.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    BlogPost, ContentRecord, NewPost, NewSession, NewSource, NormalizedRecord, PostUpdate,
    Revision, RevisionSource, Session, SessionConfigUpdate, Source,
};

use super::{content_order, Store};

#[derive(Default)]
struct State {
    sessions: Vec<Session>,
    sources: Vec<Source>,
    /// `(session_id, source_id)` in attachment order.
    attachments: Vec<(String, String)>,
    content: Vec<ContentRecord>,
    posts: Vec<BlogPost>,
    revisions: Vec<Revision>,
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn push_revision(state: &mut State, post: &BlogPost, source: RevisionSource) {
    let version = state
        .revisions
        .iter()
        .filter(|r| r.post_id == post.id)
        .map(|r| r.version)
        .max()
        .unwrap_or(0)
        + 1;
    state.revisions.push(Revision {
        id: Uuid::new_v4().to_string(),
        post_id: post.id.clone(),
        version,
        title: post.title.clone(),
        body: post.body.clone(),
        status: post.status,
        source,
        created_at: post.updated_at,
    });
}

#[async_trait]
impl Store for InMemoryStore {
    async fn create_session(&self, new: &NewSession) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            title: new.title.clone(),
            tone: new.tone.clone(),
            format: new.format.clone(),
            provider: new.provider.clone(),
            created_at: now,
            updated_at: now,
        };
        self.state.write().unwrap().sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let state = self.state.read().unwrap();
        Ok(state.sessions.iter().find(|s| s.id == id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let state = self.state.read().unwrap();
        let mut sessions = state.sessions.clone();
        sessions.reverse();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn update_session_config(
        &self,
        id: &str,
        update: &SessionConfigUpdate,
    ) -> Result<Option<Session>> {
        let mut state = self.state.write().unwrap();
        let Some(session) = state.sessions.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        if let Some(tone) = &update.tone {
            session.tone = tone.clone();
        }
        if let Some(format) = &update.format {
            session.format = format.clone();
        }
        if let Some(provider) = &update.provider {
            session.provider = provider.clone();
        }
        session.updated_at = Utc::now();
        Ok(Some(session.clone()))
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        let before = state.sessions.len();
        state.sessions.retain(|s| s.id != id);
        if state.sessions.len() == before {
            return Ok(false);
        }
        let post_ids: Vec<String> = state
            .posts
            .iter()
            .filter(|p| p.session_id == id)
            .map(|p| p.id.clone())
            .collect();
        state.revisions.retain(|r| !post_ids.contains(&r.post_id));
        state.posts.retain(|p| p.session_id != id);
        state.attachments.retain(|(session_id, _)| session_id != id);
        Ok(true)
    }

    async fn create_source(&self, new: &NewSource) -> Result<Source> {
        let mut state = self.state.write().unwrap();
        if state.sources.iter().any(|s| s.name == new.name) {
            bail!("a source named '{}' already exists", new.name);
        }
        let source = Source {
            id: Uuid::new_v4().to_string(),
            name: new.name.clone(),
            kind: new.kind,
            config: new.config.clone(),
            created_at: Utc::now(),
        };
        state.sources.push(source.clone());
        Ok(source)
    }

    async fn find_source(&self, id_or_name: &str) -> Result<Option<Source>> {
        let state = self.state.read().unwrap();
        Ok(state
            .sources
            .iter()
            .find(|s| s.id == id_or_name)
            .or_else(|| state.sources.iter().find(|s| s.name == id_or_name))
            .cloned())
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        Ok(self.state.read().unwrap().sources.clone())
    }

    async fn attach_source(&self, session_id: &str, source_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let exists = state
            .attachments
            .iter()
            .any(|(s, src)| s == session_id && src == source_id);
        if !exists {
            state
                .attachments
                .push((session_id.to_string(), source_id.to_string()));
        }
        Ok(())
    }

    async fn detach_source(&self, session_id: &str, source_id: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        let before = state.attachments.len();
        state
            .attachments
            .retain(|(s, src)| !(s == session_id && src == source_id));
        Ok(state.attachments.len() != before)
    }

    async fn list_session_sources(&self, session_id: &str) -> Result<Vec<Source>> {
        let state = self.state.read().unwrap();
        Ok(state
            .attachments
            .iter()
            .filter(|(s, _)| s == session_id)
            .filter_map(|(_, src)| state.sources.iter().find(|s| &s.id == src).cloned())
            .collect())
    }

    async fn upsert_content(
        &self,
        source_id: &str,
        records: &[NormalizedRecord],
    ) -> Result<usize> {
        let mut state = self.state.write().unwrap();
        let now = Utc::now();
        for record in records {
            let existing = state
                .content
                .iter_mut()
                .find(|c| c.source_id == source_id && c.external_id == record.external_id);
            match existing {
                Some(row) => {
                    row.kind = record.kind;
                    row.title = record.title.clone();
                    row.body = record.body.clone();
                    row.author = record.author.clone();
                    row.occurred_at = record.occurred_at;
                    row.metadata = record.metadata.clone();
                    row.fingerprint = record.fingerprint.clone();
                }
                None => state.content.push(ContentRecord {
                    id: Uuid::new_v4().to_string(),
                    source_id: source_id.to_string(),
                    external_id: record.external_id.clone(),
                    kind: record.kind,
                    title: record.title.clone(),
                    body: record.body.clone(),
                    author: record.author.clone(),
                    occurred_at: record.occurred_at,
                    metadata: record.metadata.clone(),
                    fingerprint: record.fingerprint.clone(),
                    created_at: now,
                }),
            }
        }
        Ok(records.len())
    }

    async fn list_session_content(&self, session_id: &str) -> Result<Vec<ContentRecord>> {
        let state = self.state.read().unwrap();
        let attached: Vec<&str> = state
            .attachments
            .iter()
            .filter(|(s, _)| s == session_id)
            .map(|(_, src)| src.as_str())
            .collect();
        let mut rows: Vec<ContentRecord> = state
            .content
            .iter()
            .filter(|c| attached.contains(&c.source_id.as_str()))
            .cloned()
            .collect();
        rows.sort_by(content_order);
        Ok(rows)
    }

    async fn create_post(&self, new: &NewPost) -> Result<BlogPost> {
        let mut state = self.state.write().unwrap();
        if !state.sessions.iter().any(|s| s.id == new.session_id) {
            bail!("session {} does not exist", new.session_id);
        }
        let now = Utc::now();
        let post = BlogPost {
            id: Uuid::new_v4().to_string(),
            session_id: new.session_id.clone(),
            title: new.title.clone(),
            body: new.body.clone(),
            provider: new.provider.clone(),
            status: new.status,
            generation: new.generation.clone(),
            created_at: now,
            updated_at: now,
        };
        state.posts.push(post.clone());
        push_revision(&mut state, &post, RevisionSource::Generated);
        Ok(post)
    }

    async fn get_post(&self, id: &str) -> Result<Option<BlogPost>> {
        let state = self.state.read().unwrap();
        Ok(state.posts.iter().find(|p| p.id == id).cloned())
    }

    async fn list_posts(&self, session_id: Option<&str>) -> Result<Vec<BlogPost>> {
        let state = self.state.read().unwrap();
        let mut posts: Vec<BlogPost> = state
            .posts
            .iter()
            .filter(|p| session_id.map_or(true, |id| p.session_id == id))
            .cloned()
            .collect();
        posts.reverse();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn update_post(
        &self,
        id: &str,
        update: &PostUpdate,
        source: RevisionSource,
    ) -> Result<Option<BlogPost>> {
        let mut state = self.state.write().unwrap();
        let Some(post) = state.posts.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        post.title = update.title.clone();
        post.body = update.body.clone();
        post.status = update.status;
        post.updated_at = Utc::now();
        let post = post.clone();
        push_revision(&mut state, &post, source);
        Ok(Some(post))
    }

    async fn list_revisions(&self, post_id: &str) -> Result<Vec<Revision>> {
        let state = self.state.read().unwrap();
        let mut revisions: Vec<Revision> = state
            .revisions
            .iter()
            .filter(|r| r.post_id == post_id)
            .cloned()
            .collect();
        revisions.sort_by_key(|r| r.version);
        Ok(revisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PostStatus, RawRecord, RecordKind, SourceKind};
    use crate::normalize::normalize;
    use chrono::TimeZone;
    use serde_json::json;

    fn raw(id: &str, title: &str, day: Option<u32>) -> RawRecord {
        RawRecord {
            external_id: id.to_string(),
            kind: RecordKind::Commit,
            title: title.to_string(),
            body: format!("body of {}", title),
            author: Some("dev".to_string()),
            occurred_at: day.map(|d| Utc.with_ymd_and_hms(2024, 3, d, 9, 0, 0).unwrap()),
            metadata: json!({}),
        }
    }

    async fn session_with_source(store: &InMemoryStore) -> (Session, Source) {
        let session = store
            .create_session(&NewSession {
                title: "Sprint 12".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let source = store
            .create_source(&NewSource {
                name: "api".to_string(),
                kind: SourceKind::Git,
                config: json!({"repo": "/tmp/api"}),
            })
            .await
            .unwrap();
        store.attach_source(&session.id, &source.id).await.unwrap();
        (session, source)
    }

    fn new_post(session_id: &str) -> NewPost {
        NewPost {
            session_id: session_id.to_string(),
            title: "Draft".to_string(),
            body: "# Draft".to_string(),
            provider: "mock".to_string(),
            status: PostStatus::Draft,
            generation: json!({}),
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_external_id() {
        let store = InMemoryStore::new();
        let (session, source) = session_with_source(&store).await;

        let first = normalize(vec![raw("a", "Add login", Some(2))]);
        store.upsert_content(&source.id, &first).await.unwrap();
        let second = normalize(vec![raw("a", "Add login page", Some(2))]);
        store.upsert_content(&source.id, &second).await.unwrap();

        let rows = store.list_session_content(&session.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Add login page");
    }

    #[tokio::test]
    async fn content_is_ordered_with_unknown_dates_last() {
        let store = InMemoryStore::new();
        let (session, source) = session_with_source(&store).await;
        let records = normalize(vec![
            raw("c", "third commit", None),
            raw("b", "second commit", Some(5)),
            raw("a", "first commit", Some(1)),
        ]);
        store.upsert_content(&source.id, &records).await.unwrap();

        let titles: Vec<String> = store
            .list_session_content(&session.id)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.title)
            .collect();
        assert_eq!(titles, vec!["first commit", "second commit", "third commit"]);
    }

    #[tokio::test]
    async fn detached_sources_do_not_contribute_content() {
        let store = InMemoryStore::new();
        let (session, source) = session_with_source(&store).await;
        store
            .upsert_content(&source.id, &normalize(vec![raw("a", "Add login", Some(1))]))
            .await
            .unwrap();
        assert!(store.detach_source(&session.id, &source.id).await.unwrap());
        assert!(!store.detach_source(&session.id, &source.id).await.unwrap());
        assert!(store.list_session_content(&session.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn post_revisions_increase_from_one() {
        let store = InMemoryStore::new();
        let (session, _) = session_with_source(&store).await;
        let post = store.create_post(&new_post(&session.id)).await.unwrap();

        let update = PostUpdate {
            title: "Draft v2".to_string(),
            body: "# Draft v2".to_string(),
            status: PostStatus::Published,
        };
        let updated = store
            .update_post(&post.id, &update, RevisionSource::ManualEdit)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, PostStatus::Published);

        let revisions = store.list_revisions(&post.id).await.unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].version, 1);
        assert_eq!(revisions[0].source, RevisionSource::Generated);
        assert_eq!(revisions[1].version, 2);
        assert_eq!(revisions[1].source, RevisionSource::ManualEdit);
        assert_eq!(revisions[1].title, "Draft v2");
    }

    #[tokio::test]
    async fn delete_session_cascades() {
        let store = InMemoryStore::new();
        let (session, source) = session_with_source(&store).await;
        let post = store.create_post(&new_post(&session.id)).await.unwrap();

        assert!(store.delete_session(&session.id).await.unwrap());
        assert!(store.get_post(&post.id).await.unwrap().is_none());
        assert!(store.list_revisions(&post.id).await.unwrap().is_empty());
        assert!(store.list_session_sources(&session.id).await.unwrap().is_empty());
        assert!(store.find_source(&source.id).await.unwrap().is_some());
        assert!(!store.delete_session(&session.id).await.unwrap());
    }

    #[tokio::test]
    async fn session_config_update_can_clear_fields() {
        let store = InMemoryStore::new();
        let session = store
            .create_session(&NewSession {
                title: "s".to_string(),
                tone: Some("casual".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let update = SessionConfigUpdate {
            tone: Some(None),
            format: Some(Some("release notes".to_string())),
            provider: None,
        };
        let updated = store
            .update_session_config(&session.id, &update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.tone, None);
        assert_eq!(updated.format.as_deref(), Some("release notes"));
        assert!(store
            .update_session_config("missing", &update)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn sources_are_found_by_name_and_names_are_unique() {
        let store = InMemoryStore::new();
        let (_, source) = session_with_source(&store).await;
        let found = store.find_source("api").await.unwrap().unwrap();
        assert_eq!(found.id, source.id);
        let dup = store
            .create_source(&NewSource {
                name: "api".to_string(),
                kind: SourceKind::Notion,
                config: json!({"pageId": "p"}),
            })
            .await;
        assert!(dup.is_err());
    }
}
