//! Record normalization, fingerprinting, and deduplication.
//!
//! Turns adapter output ([`RawRecord`]) into [`NormalizedRecord`]s:
//!
//! 1. Title and body are whitespace-normalized independently.
//! 2. Records with no title and fewer than [`MIN_SIGNAL_CHARS`] body
//!    characters are dropped without being fingerprinted.
//! 3. An empty title becomes [`UNTITLED`].
//! 4. A SHA-1 fingerprint over `kind|title|body-prefix` (lowercased) is
//!    computed; a later record repeating an earlier fingerprint in the same
//!    batch is discarded.
//!
//! The transform is idempotent: feeding its output back in yields the
//! same records and the same fingerprints.
//!
//! [`build_item`] then turns a surviving record into the [`ContentItem`]
//! view used for prompt assembly.

use std::collections::HashSet;

use sha1::{Digest, Sha1};

use crate::models::{format_ts_iso, ContentItem, NormalizedRecord, RawRecord, Source};
use crate::theme::classify;

/// Title used when a record carries body text but no title.
pub const UNTITLED: &str = "(untitled)";

/// Body used in the prompt view when a record has a title but no body.
pub const EMPTY_BODY: &str = "(본문 없음)";

/// Untitled records need at least this many body characters to survive.
pub const MIN_SIGNAL_CHARS: usize = 20;

/// Number of (lowercased) body characters that feed the fingerprint.
pub const FINGERPRINT_BODY_CHARS: usize = 400;

/// Normalize a batch, keeping the first record for each fingerprint.
pub fn normalize(records: Vec<RawRecord>) -> Vec<NormalizedRecord> {
    normalize_by(records, |r| r.clone())
        .into_iter()
        .map(|(_, n)| n)
        .collect()
}

/// Normalize a batch of arbitrary entries, pairing each survivor with its
/// original entry so callers can keep side data (e.g. the owning source).
pub fn normalize_by<T, F>(entries: Vec<T>, raw: F) -> Vec<(T, NormalizedRecord)>
where
    F: Fn(&T) -> RawRecord,
{
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(entries.len());

    for entry in entries {
        let Some(record) = normalize_record(raw(&entry)) else {
            continue;
        };
        if !seen.insert(record.fingerprint.clone()) {
            continue;
        }
        out.push((entry, record));
    }

    out
}

/// Normalize one record, or `None` if it carries no signal.
pub fn normalize_record(record: RawRecord) -> Option<NormalizedRecord> {
    let title = normalize_text(&record.title);
    let body = normalize_text(&record.body);

    if title.is_empty() && body.chars().count() < MIN_SIGNAL_CHARS {
        return None;
    }
    let title = if title.is_empty() {
        UNTITLED.to_string()
    } else {
        title
    };

    let fingerprint = fingerprint(record.kind.as_str(), &title, &body);

    let mut metadata = match record.metadata {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("raw".to_string(), other);
            map
        }
    };
    metadata.insert(
        "fingerprint".to_string(),
        serde_json::Value::String(fingerprint.clone()),
    );

    let author = record
        .author
        .map(|a| normalize_text(&a))
        .filter(|a| !a.is_empty());

    Some(NormalizedRecord {
        external_id: record.external_id,
        kind: record.kind,
        title,
        body,
        author,
        occurred_at: record.occurred_at,
        metadata: serde_json::Value::Object(metadata),
        fingerprint,
    })
}

/// `sha1(kind|lower(title)|first 400 chars of lower(body))` as lowercase hex.
pub fn fingerprint(kind: &str, title: &str, body: &str) -> String {
    let body_prefix: String = body
        .to_lowercase()
        .chars()
        .take(FINGERPRINT_BODY_CHARS)
        .collect();

    let mut hasher = Sha1::new();
    hasher.update(kind.as_bytes());
    hasher.update(b"|");
    hasher.update(title.to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(body_prefix.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Collapse whitespace: CRLF → LF, runs of spaces/tabs → one space, no
/// spaces at line edges, at most one blank line in a row, trimmed.
pub fn normalize_text(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_space = false;
    let mut newlines = 0usize;

    for ch in unified.chars() {
        match ch {
            ' ' | '\t' => {
                if newlines == 0 && !out.is_empty() {
                    pending_space = true;
                }
            }
            '\n' => {
                pending_space = false;
                if !out.is_empty() {
                    newlines += 1;
                }
            }
            _ => {
                if newlines > 0 {
                    for _ in 0..newlines.min(2) {
                        out.push('\n');
                    }
                    newlines = 0;
                } else if pending_space {
                    out.push(' ');
                }
                pending_space = false;
                out.push(ch);
            }
        }
    }

    out
}

/// Build the prompt view of a surviving record owned by `source`.
pub fn build_item(source: &Source, record: &NormalizedRecord) -> ContentItem {
    let body = if record.body.is_empty() {
        EMPTY_BODY.to_string()
    } else {
        record.body.clone()
    };

    let (occurred_at, month_bucket) = match &record.occurred_at {
        Some(ts) => (format_ts_iso(ts), ts.format("%Y-%m").to_string()),
        None => ("unknown".to_string(), "unknown".to_string()),
    };

    ContentItem {
        source_name: source.name.clone(),
        source_type: source.kind.as_str().to_string(),
        kind: record.kind,
        title: record.title.clone(),
        theme: classify(&record.title, &record.body, record.kind),
        body,
        author: record
            .author
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        occurred_at,
        month_bucket,
        evidence: resolve_evidence(&record.metadata),
        fingerprint: record.fingerprint.clone(),
    }
}

/// Resolve the most specific citation an item's metadata allows.
///
/// Preference: commit web URL (`repoUrl` + `hash`), explicit `url`, bare
/// `hash`, `notion:<pageId>`, then `"n/a"`.
pub fn resolve_evidence(metadata: &serde_json::Value) -> String {
    let field = |key: &str| {
        metadata
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    if let (Some(repo), Some(hash)) = (field("repoUrl"), field("hash")) {
        return format!("{}/commit/{}", web_base(repo), hash);
    }
    if let Some(url) = field("url") {
        return url.to_string();
    }
    if let Some(hash) = field("hash") {
        return hash.to_string();
    }
    if let Some(page_id) = field("pageId") {
        return format!("notion:{}", page_id);
    }
    "n/a".to_string()
}

/// `git@host:org/repo.git` → `https://host/org/repo`; strips `.git`.
fn web_base(repo_url: &str) -> String {
    let trimmed = repo_url.trim_end_matches('/').trim_end_matches(".git");
    if let Some(rest) = trimmed.strip_prefix("git@") {
        if let Some((host, path)) = rest.split_once(':') {
            return format!("https://{}/{}", host, path);
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecordKind, SourceKind};
    use crate::theme::Theme;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn commit(id: &str, title: &str, body: &str) -> RawRecord {
        RawRecord {
            external_id: id.to_string(),
            kind: RecordKind::Commit,
            title: title.to_string(),
            body: body.to_string(),
            author: Some("dev".to_string()),
            occurred_at: None,
            metadata: json!({}),
        }
    }

    fn git_source() -> Source {
        Source {
            id: "s1".to_string(),
            name: "api".to_string(),
            kind: SourceKind::Git,
            config: json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn text_whitespace_is_collapsed() {
        assert_eq!(normalize_text("  a \t\t b  "), "a b");
        assert_eq!(normalize_text("a\r\nb"), "a\nb");
        assert_eq!(normalize_text("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(normalize_text("a  \n   \n  \n b"), "a\n\nb");
        assert_eq!(normalize_text("\n\n  "), "");
    }

    #[test]
    fn text_normalization_is_idempotent() {
        let once = normalize_text(" x\t y \r\n\r\n\r\n\r\n z  ");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn low_signal_records_are_dropped() {
        let out = normalize(vec![
            commit("a", "", "too short"),
            commit("b", "   ", "\n\n still short \n"),
            commit("c", "", "this body is long enough to keep"),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].external_id, "c");
        assert_eq!(out[0].title, UNTITLED);
    }

    #[test]
    fn titled_record_with_empty_body_survives() {
        let out = normalize(vec![commit("a", "Release", "")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].body, "");
    }

    #[test]
    fn duplicates_collapse_to_first_seen() {
        let out = normalize(vec![
            commit("first", "Fix Login", "Same body text"),
            commit("second", "fix login", "  same   BODY text "),
            commit("third", "Fix login", "different body"),
        ]);
        let ids: Vec<&str> = out.iter().map(|r| r.external_id.as_str()).collect();
        assert_eq!(ids, vec!["first", "third"]);
    }

    #[test]
    fn fingerprint_only_sees_first_400_body_chars() {
        let prefix = "x".repeat(400);
        let out = normalize(vec![
            commit("a", "T", &format!("{}tail-one", prefix)),
            commit("b", "T", &format!("{}tail-two", prefix)),
        ]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn kind_is_part_of_the_fingerprint() {
        let mut notion = commit("n", "Notes", "shared body");
        notion.kind = RecordKind::Notion;
        let out = normalize(vec![commit("c", "Notes", "shared body"), notion]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn fingerprint_is_recorded_in_metadata() {
        let out = normalize(vec![commit("a", "Title", "body")]);
        assert_eq!(out[0].metadata["fingerprint"], json!(out[0].fingerprint));
        assert_eq!(out[0].fingerprint.len(), 40);
    }

    #[test]
    fn normalization_is_idempotent() {
        let batch = vec![
            commit("a", "", "  untitled but long enough body  "),
            commit("b", "Fix\tbug", "line\r\n\r\n\r\n\r\nnext"),
            commit("c", "fix bug", "line\n\nnext"),
            commit("d", "", "short"),
        ];
        let first = normalize(batch);
        let second = normalize(first.clone().into_iter().map(|r| r.into_raw()).collect());
        assert_eq!(first, second);
    }

    #[test]
    fn build_item_fills_defaults() {
        let mut raw = commit("a", "Fix crash", "");
        raw.author = None;
        let record = normalize_record(raw).unwrap();
        let item = build_item(&git_source(), &record);
        assert_eq!(item.body, EMPTY_BODY);
        assert_eq!(item.author, "unknown");
        assert_eq!(item.occurred_at, "unknown");
        assert_eq!(item.month_bucket, "unknown");
        assert_eq!(item.evidence, "n/a");
        assert_eq!(item.theme, Theme::StabilityAndFixes);
        assert_eq!(item.source_type, "git");
    }

    #[test]
    fn build_item_buckets_by_month() {
        let mut raw = commit("a", "Ship it", "body");
        raw.occurred_at = Some(Utc.with_ymd_and_hms(2024, 3, 9, 8, 30, 0).unwrap());
        let item = build_item(&git_source(), &normalize_record(raw).unwrap());
        assert_eq!(item.occurred_at, "2024-03-09T08:30:00Z");
        assert_eq!(item.month_bucket, "2024-03");
    }

    #[test]
    fn commit_evidence_uses_web_url() {
        let meta = json!({"hash": "abc123", "repoUrl": "https://github.com/acme/api.git"});
        assert_eq!(
            resolve_evidence(&meta),
            "https://github.com/acme/api/commit/abc123"
        );

        let ssh = json!({"hash": "def456", "repoUrl": "git@github.com:acme/web.git"});
        assert_eq!(
            resolve_evidence(&ssh),
            "https://github.com/acme/web/commit/def456"
        );
    }

    #[test]
    fn evidence_fallbacks() {
        assert_eq!(resolve_evidence(&json!({"hash": "abc"})), "abc");
        assert_eq!(resolve_evidence(&json!({"pageId": "p-1"})), "notion:p-1");
        assert_eq!(resolve_evidence(&json!({"url": "https://x/y"})), "https://x/y");
        assert_eq!(resolve_evidence(&json!({})), "n/a");
        assert_eq!(resolve_evidence(&json!(null)), "n/a");
    }
}
