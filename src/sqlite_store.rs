//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation to SQL against the schema created by
//! [`migrate`](crate::migrate). Timestamps are stored as Unix
//! milliseconds and JSON columns as text.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use draft_harness_core::models::{
    BlogPost, ContentRecord, NewPost, NewSession, NewSource, NormalizedRecord, PostStatus,
    PostUpdate, RecordKind, Revision, RevisionSource, Session, SessionConfigUpdate, Source,
    SourceKind,
};
use draft_harness_core::store::Store;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_json(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        tone: row.try_get("tone")?,
        format: row.try_get("format")?,
        provider: row.try_get("provider")?,
        created_at: from_ms(row.try_get("created_at")?),
        updated_at: from_ms(row.try_get("updated_at")?),
    })
}

fn row_to_source(row: &SqliteRow) -> Result<Source> {
    let kind: String = row.try_get("kind")?;
    let config: String = row.try_get("config_json")?;
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: SourceKind::parse(&kind).ok_or_else(|| anyhow!("unknown source kind '{}'", kind))?,
        config: parse_json(&config),
        created_at: from_ms(row.try_get("created_at")?),
    })
}

fn row_to_content(row: &SqliteRow) -> Result<ContentRecord> {
    let kind: String = row.try_get("kind")?;
    let metadata: String = row.try_get("metadata_json")?;
    let occurred_at: Option<i64> = row.try_get("occurred_at")?;
    Ok(ContentRecord {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        external_id: row.try_get("external_id")?,
        kind: RecordKind::parse(&kind).ok_or_else(|| anyhow!("unknown record kind '{}'", kind))?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        author: row.try_get("author")?,
        occurred_at: occurred_at.map(from_ms),
        metadata: parse_json(&metadata),
        fingerprint: row.try_get("fingerprint")?,
        created_at: from_ms(row.try_get("created_at")?),
    })
}

fn parse_status(raw: &str) -> Result<PostStatus> {
    PostStatus::parse(raw).ok_or_else(|| anyhow!("unknown post status '{}'", raw))
}

fn row_to_post(row: &SqliteRow) -> Result<BlogPost> {
    let status: String = row.try_get("status")?;
    let generation: String = row.try_get("generation_json")?;
    Ok(BlogPost {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        provider: row.try_get("provider")?,
        status: parse_status(&status)?,
        generation: parse_json(&generation),
        created_at: from_ms(row.try_get("created_at")?),
        updated_at: from_ms(row.try_get("updated_at")?),
    })
}

fn row_to_revision(row: &SqliteRow) -> Result<Revision> {
    let status: String = row.try_get("status")?;
    let source: String = row.try_get("source")?;
    Ok(Revision {
        id: row.try_get("id")?,
        post_id: row.try_get("post_id")?,
        version: row.try_get("version")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        status: parse_status(&status)?,
        source: RevisionSource::parse(&source)
            .ok_or_else(|| anyhow!("unknown revision source '{}'", source))?,
        created_at: from_ms(row.try_get("created_at")?),
    })
}

const SESSION_COLUMNS: &str = "id, title, tone, format, provider, created_at, updated_at";
const SOURCE_COLUMNS: &str = "id, name, kind, config_json, created_at";
const POST_COLUMNS: &str =
    "id, session_id, title, body, provider, status, generation_json, created_at, updated_at";
const REVISION_COLUMNS: &str = "id, post_id, version, title, body, status, source, created_at";

#[async_trait]
impl Store for SqliteStore {
    async fn create_session(&self, new: &NewSession) -> Result<Session> {
        let id = Uuid::new_v4().to_string();
        let now = now_ms();
        sqlx::query(
            "INSERT INTO sessions (id, title, tone, format, provider, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.title)
        .bind(&new.tone)
        .bind(&new.format)
        .bind(&new.provider)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_session(&id)
            .await?
            .ok_or_else(|| anyhow!("session {} vanished after insert", id))
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(&format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sessions ORDER BY updated_at DESC, rowid DESC",
            SESSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_session).collect()
    }

    async fn update_session_config(
        &self,
        id: &str,
        update: &SessionConfigUpdate,
    ) -> Result<Option<Session>> {
        let Some(mut session) = self.get_session(id).await? else {
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

        sqlx::query(
            "UPDATE sessions SET tone = ?, format = ?, provider = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&session.tone)
        .bind(&session.format)
        .bind(&session.provider)
        .bind(now_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_session(id).await
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM revisions WHERE post_id IN (SELECT id FROM posts WHERE session_id = ?)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM posts WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM session_sources WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_source(&self, new: &NewSource) -> Result<Source> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO sources (id, name, kind, config_json, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.name)
        .bind(new.kind.as_str())
        .bind(new.config.to_string())
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create source '{}'", new.name))?;

        self.find_source(&id)
            .await?
            .ok_or_else(|| anyhow!("source {} vanished after insert", id))
    }

    async fn find_source(&self, id_or_name: &str) -> Result<Option<Source>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM sources WHERE id = ? OR name = ? ORDER BY (id = ?) DESC LIMIT 1",
            SOURCE_COLUMNS
        ))
        .bind(id_or_name)
        .bind(id_or_name)
        .bind(id_or_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_source).transpose()
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM sources ORDER BY name ASC",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_source).collect()
    }

    async fn attach_source(&self, session_id: &str, source_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO session_sources (session_id, source_id, attached_at) \
             VALUES (?, ?, ?)",
        )
        .bind(session_id)
        .bind(source_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn detach_source(&self, session_id: &str, source_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM session_sources WHERE session_id = ? AND source_id = ?")
                .bind(session_id)
                .bind(source_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_session_sources(&self, session_id: &str) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            "SELECT s.id, s.name, s.kind, s.config_json, s.created_at \
             FROM sources s JOIN session_sources ss ON ss.source_id = s.id \
             WHERE ss.session_id = ? \
             ORDER BY ss.attached_at ASC, ss.rowid ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_source).collect()
    }

    async fn upsert_content(
        &self,
        source_id: &str,
        records: &[NormalizedRecord],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let now = now_ms();

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO content_items (id, source_id, external_id, kind, title, body, author,
                                           occurred_at, metadata_json, fingerprint, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_id, external_id) DO UPDATE SET
                    kind = excluded.kind,
                    title = excluded.title,
                    body = excluded.body,
                    author = excluded.author,
                    occurred_at = excluded.occurred_at,
                    metadata_json = excluded.metadata_json,
                    fingerprint = excluded.fingerprint
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(source_id)
            .bind(&record.external_id)
            .bind(record.kind.as_str())
            .bind(&record.title)
            .bind(&record.body)
            .bind(&record.author)
            .bind(record.occurred_at.map(|t| t.timestamp_millis()))
            .bind(record.metadata.to_string())
            .bind(&record.fingerprint)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(records.len())
    }

    async fn list_session_content(&self, session_id: &str) -> Result<Vec<ContentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.source_id, c.external_id, c.kind, c.title, c.body, c.author,
                   c.occurred_at, c.metadata_json, c.fingerprint, c.created_at
            FROM content_items c
            JOIN session_sources ss ON ss.source_id = c.source_id
            WHERE ss.session_id = ?
            ORDER BY c.occurred_at IS NULL, c.occurred_at ASC, c.created_at ASC, c.rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_content).collect()
    }

    async fn create_post(&self, new: &NewPost) -> Result<BlogPost> {
        let id = Uuid::new_v4().to_string();
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO posts (id, session_id, title, body, provider, status, generation_json, \
             created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&new.session_id)
        .bind(&new.title)
        .bind(&new.body)
        .bind(&new.provider)
        .bind(new.status.as_str())
        .bind(new.generation.to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create post for session {}", new.session_id))?;

        insert_revision(
            &mut tx,
            &id,
            1,
            &new.title,
            &new.body,
            new.status,
            RevisionSource::Generated,
            now,
        )
        .await?;

        tx.commit().await?;

        self.get_post(&id)
            .await?
            .ok_or_else(|| anyhow!("post {} vanished after insert", id))
    }

    async fn get_post(&self, id: &str) -> Result<Option<BlogPost>> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_post).transpose()
    }

    async fn list_posts(&self, session_id: Option<&str>) -> Result<Vec<BlogPost>> {
        let rows = match session_id {
            Some(session_id) => {
                sqlx::query(&format!(
                    "SELECT {} FROM posts WHERE session_id = ? ORDER BY created_at DESC, rowid DESC",
                    POST_COLUMNS
                ))
                .bind(session_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM posts ORDER BY created_at DESC, rowid DESC",
                    POST_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(row_to_post).collect()
    }

    async fn update_post(
        &self,
        id: &str,
        update: &PostUpdate,
        source: RevisionSource,
    ) -> Result<Option<BlogPost>> {
        let now = now_ms();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE posts SET title = ?, body = ?, status = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&update.title)
        .bind(&update.body)
        .bind(update.status.as_str())
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let current: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM revisions WHERE post_id = ?")
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;

        insert_revision(
            &mut tx,
            id,
            current + 1,
            &update.title,
            &update.body,
            update.status,
            source,
            now,
        )
        .await?;

        tx.commit().await?;
        self.get_post(id).await
    }

    async fn list_revisions(&self, post_id: &str) -> Result<Vec<Revision>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM revisions WHERE post_id = ? ORDER BY version ASC",
            REVISION_COLUMNS
        ))
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_revision).collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn insert_revision(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    post_id: &str,
    version: i64,
    title: &str,
    body: &str,
    status: PostStatus,
    source: RevisionSource,
    created_at: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO revisions (id, post_id, version, title, body, status, source, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(post_id)
    .bind(version)
    .bind(title)
    .bind(body)
    .bind(status.as_str())
    .bind(source.as_str())
    .bind(created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
