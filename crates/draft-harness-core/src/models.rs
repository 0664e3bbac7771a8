//! Core data models used throughout Draft Harness.
//!
//! These types represent the records, content items, sessions, and posts
//! that flow through the ingestion → generation pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::theme::Theme;

/// Tone used when neither the session nor the request sets one.
pub const DEFAULT_TONE: &str = "기본 톤";

/// Format used when neither the session nor the request sets one.
pub const DEFAULT_FORMAT: &str = "기본 기술 블로그 형식";

/// What an ingested record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Commit,
    Notion,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Commit => "commit",
            RecordKind::Notion => "notion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "commit" => Some(RecordKind::Commit),
            "notion" => Some(RecordKind::Notion),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw record produced by an ingestion adapter before normalization.
///
/// Adapters emit records in their natural order (chronological ascending
/// for git). Nothing here is trimmed, deduplicated, or size-limited yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub external_id: String,
    pub kind: RecordKind,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

/// A record that survived normalization, carrying its content fingerprint.
///
/// `title` is never empty (`"(untitled)"` sentinel) and `metadata`
/// contains a `fingerprint` key mirroring [`NormalizedRecord::fingerprint`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub external_id: String,
    pub kind: RecordKind,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub fingerprint: String,
}

impl NormalizedRecord {
    /// Turn the record back into adapter form, e.g. to re-run normalization.
    pub fn into_raw(self) -> RawRecord {
        RawRecord {
            external_id: self.external_id,
            kind: self.kind,
            title: self.title,
            body: self.body,
            author: self.author,
            occurred_at: self.occurred_at,
            metadata: self.metadata,
        }
    }
}

/// The stored form of a normalized record, owned by one source.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    pub id: String,
    pub source_id: String,
    pub external_id: String,
    pub kind: RecordKind,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub occurred_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

impl ContentRecord {
    pub fn to_raw(&self) -> RawRecord {
        RawRecord {
            external_id: self.external_id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            body: self.body.clone(),
            author: self.author.clone(),
            occurred_at: self.occurred_at,
            metadata: self.metadata.clone(),
        }
    }
}

/// Canonical, themed view of one record, rebuilt for every generation call.
///
/// Citation ids (`C1..Cn`) are not part of the item; the prompt builder
/// assigns them from the item's position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub source_name: String,
    pub source_type: String,
    pub kind: RecordKind,
    pub title: String,
    pub body: String,
    pub author: String,
    /// ISO-8601 timestamp or `"unknown"`.
    pub occurred_at: String,
    /// `YYYY-MM` or `"unknown"`.
    pub month_bucket: String,
    pub theme: Theme,
    pub evidence: String,
    pub fingerprint: String,
}

/// Kind of external system a source pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Git,
    Notion,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Git => "git",
            SourceKind::Notion => "notion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "git" => Some(SourceKind::Git),
            "notion" => Some(SourceKind::Notion),
            _ => None,
        }
    }
}

/// A configured ingestion source (a git repository or a Notion page).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub id: String,
    pub name: String,
    pub kind: SourceKind,
    /// Adapter-specific settings, e.g. `{"repo": "...", "branch": "main"}`.
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub name: String,
    pub kind: SourceKind,
    pub config: serde_json::Value,
}

/// A writing session: generation defaults plus a set of attached sources.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub title: String,
    pub tone: Option<String>,
    pub format: Option<String>,
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub title: String,
    pub tone: Option<String>,
    pub format: Option<String>,
    pub provider: Option<String>,
}

/// Partial update of session defaults.
///
/// The outer `Option` means "leave unchanged"; `Some(None)` clears the value.
#[derive(Debug, Clone, Default)]
pub struct SessionConfigUpdate {
    pub tone: Option<Option<String>>,
    pub format: Option<Option<String>>,
    pub provider: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Published,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Published => "published",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(PostStatus::Draft),
            "published" => Some(PostStatus::Published),
            _ => None,
        }
    }
}

/// A blog post with its current title/body/status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPost {
    pub id: String,
    pub session_id: String,
    pub title: String,
    pub body: String,
    pub provider: String,
    pub status: PostStatus,
    /// How the draft was produced (tone, format, prompt mode, fallback, ...).
    pub generation: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub session_id: String,
    pub title: String,
    pub body: String,
    pub provider: String,
    pub status: PostStatus,
    pub generation: serde_json::Value,
}

/// Replacement values for a post's current state.
#[derive(Debug, Clone)]
pub struct PostUpdate {
    pub title: String,
    pub body: String,
    pub status: PostStatus,
}

/// What produced a revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionSource {
    #[serde(rename = "generated")]
    Generated,
    #[serde(rename = "manual-edit")]
    ManualEdit,
}

impl RevisionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevisionSource::Generated => "generated",
            RevisionSource::ManualEdit => "manual-edit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "generated" => Some(RevisionSource::Generated),
            "manual-edit" => Some(RevisionSource::ManualEdit),
            _ => None,
        }
    }
}

/// Immutable snapshot of a post after one mutation. Versions start at 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: String,
    pub post_id: String,
    pub version: i64,
    pub title: String,
    pub body: String,
    pub status: PostStatus,
    pub source: RevisionSource,
    pub created_at: DateTime<Utc>,
}

/// Format a timestamp the way every prompt and API surface shows it.
pub fn format_ts_iso(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
