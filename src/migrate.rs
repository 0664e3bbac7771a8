//! Database schema creation.
//!
//! Every statement is `CREATE ... IF NOT EXISTS`, so running `draft init`
//! repeatedly is safe. There are no versioned migrations.
//!
//! | Table | Contents |
//! |-------|----------|
//! | `sessions` | Writing sessions and their tone/format/provider defaults |
//! | `sources` | Git and Notion sources with adapter config JSON |
//! | `session_sources` | Session ↔ source attachments |
//! | `content_items` | Normalized records, unique per `(source_id, external_id)` |
//! | `posts` | Current state of each generated post |
//! | `revisions` | Immutable post snapshots, unique per `(post_id, version)` |
//!
//! Timestamps are Unix milliseconds; `occurred_at` is nullable.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        tone TEXT,
        format TEXT,
        provider TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        config_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS session_sources (
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        attached_at INTEGER NOT NULL,
        PRIMARY KEY (session_id, source_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS content_items (
        id TEXT PRIMARY KEY,
        source_id TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        external_id TEXT NOT NULL,
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        author TEXT,
        occurred_at INTEGER,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        fingerprint TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(source_id, external_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS posts (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        provider TEXT NOT NULL,
        status TEXT NOT NULL,
        generation_json TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS revisions (
        id TEXT PRIMARY KEY,
        post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
        version INTEGER NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        status TEXT NOT NULL,
        source TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE(post_id, version)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_content_items_source ON content_items(source_id)",
    "CREATE INDEX IF NOT EXISTS idx_posts_session ON posts(session_id)",
    "CREATE INDEX IF NOT EXISTS idx_revisions_post ON revisions(post_id)",
];

/// Create all tables on an open pool.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Open the configured database and create all tables.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
