//! Notion page connector.
//!
//! Fetches the top-level blocks of one page through the Notion REST API and
//! splits them into sections at every heading. Each section becomes one
//! [`RawRecord`]:
//!
//! | Field | Value |
//! |-------|-------|
//! | `external_id` | `<pageId>#<headingBlockId>` (`<pageId>#intro` before the first heading) |
//! | `title` | heading text, or the page title for the intro section |
//! | `body` | text of the section's blocks, one line per block |
//! | `occurred_at` | latest `last_edited_time` in the section |
//! | `metadata` | `pageId`, `blockId` |
//!
//! The token is read from the environment variable named by
//! `notion.token_env` (default `NOTION_TOKEN`).

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use draft_harness_core::models::{RawRecord, RecordKind};

use crate::config::NotionConfig;

const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

/// Adapter config stored on a Notion source.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotionSourceConfig {
    pub page_id: String,
}

impl NotionSourceConfig {
    pub fn from_json(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).with_context(|| "Invalid notion source config")
    }
}

/// Fetch a page and convert it into section records.
pub async fn scan_notion(config: &NotionConfig, source: &NotionSourceConfig) -> Result<Vec<RawRecord>> {
    let token = std::env::var(&config.token_env)
        .map_err(|_| anyhow!("{} not set", config.token_env))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let base = config.api_base.trim_end_matches('/');

    let page = get_json(&client, &token, &format!("{}/pages/{}", base, source.page_id)).await?;
    let title = page_title(&page).unwrap_or_default();

    let mut blocks = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut url = format!(
            "{}/blocks/{}/children?page_size={}",
            base, source.page_id, PAGE_SIZE
        );
        if let Some(c) = &cursor {
            url.push_str(&format!("&start_cursor={}", c));
        }
        let batch = get_json(&client, &token, &url).await?;
        if let Some(results) = batch.get("results").and_then(Value::as_array) {
            blocks.extend(results.iter().cloned());
        }
        let has_more = batch.get("has_more").and_then(Value::as_bool).unwrap_or(false);
        cursor = batch
            .get("next_cursor")
            .and_then(Value::as_str)
            .map(str::to_string);
        if !has_more || cursor.is_none() {
            break;
        }
    }

    Ok(blocks_to_records(&source.page_id, &title, &blocks))
}

async fn get_json(client: &reqwest::Client, token: &str, url: &str) -> Result<Value> {
    let resp = client
        .get(url)
        .header("Authorization", format!("Bearer {}", token))
        .header("Notion-Version", NOTION_VERSION)
        .send()
        .await
        .map_err(|e| anyhow!("Notion request failed for {}: {}", url, e))?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        bail!(
            "Notion API error (HTTP {}): {}",
            status,
            body.chars().take(500).collect::<String>()
        );
    }

    Ok(resp.json().await?)
}

/// Title of a page object: the plain text of its `title` property.
pub fn page_title(page: &Value) -> Option<String> {
    page.get("properties")?
        .as_object()?
        .values()
        .find(|p| p.get("type").and_then(Value::as_str) == Some("title"))
        .and_then(|p| p.get("title"))
        .map(plain_text)
}

fn plain_text(rich_text: &Value) -> String {
    rich_text
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("plain_text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Text of one block, or `None` for blocks without text.
fn block_text(block: &Value) -> Option<String> {
    let kind = block.get("type")?.as_str()?;
    let payload = block.get(kind)?;
    let text = plain_text(payload.get("rich_text")?);
    let line = match kind {
        "bulleted_list_item" => format!("- {}", text),
        "numbered_list_item" => format!("1. {}", text),
        "to_do" => {
            let checked = payload.get("checked").and_then(Value::as_bool).unwrap_or(false);
            format!("[{}] {}", if checked { "x" } else { " " }, text)
        }
        "quote" => format!("> {}", text),
        _ => text,
    };
    Some(line)
}

fn is_heading(block: &Value) -> bool {
    matches!(
        block.get("type").and_then(Value::as_str),
        Some("heading_1" | "heading_2" | "heading_3")
    )
}

fn edited_at(block: &Value) -> Option<DateTime<Utc>> {
    block
        .get("last_edited_time")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

struct Section {
    block_id: String,
    title: String,
    lines: Vec<String>,
    occurred_at: Option<DateTime<Utc>>,
}

impl Section {
    fn touch(&mut self, block: &Value) {
        if let Some(ts) = edited_at(block) {
            self.occurred_at = Some(self.occurred_at.map_or(ts, |cur| cur.max(ts)));
        }
    }
}

/// Group blocks into heading sections. Sections with neither title text
/// nor body are skipped.
pub fn blocks_to_records(page_id: &str, page_title: &str, blocks: &[Value]) -> Vec<RawRecord> {
    let mut sections = vec![Section {
        block_id: "intro".to_string(),
        title: page_title.to_string(),
        lines: Vec::new(),
        occurred_at: None,
    }];

    for block in blocks {
        if is_heading(block) {
            let mut section = Section {
                block_id: block
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                title: block_text(block).unwrap_or_default(),
                lines: Vec::new(),
                occurred_at: None,
            };
            section.touch(block);
            sections.push(section);
            continue;
        }
        let Some(current) = sections.last_mut() else {
            continue;
        };
        current.touch(block);
        if let Some(line) = block_text(block) {
            current.lines.push(line);
        }
    }

    sections
        .into_iter()
        .filter(|s| !s.lines.is_empty() || (s.block_id != "intro" && !s.title.trim().is_empty()))
        .map(|s| RawRecord {
            external_id: format!("{}#{}", page_id, s.block_id),
            kind: RecordKind::Notion,
            title: s.title,
            body: s.lines.join("\n"),
            author: None,
            occurred_at: s.occurred_at,
            metadata: serde_json::json!({
                "pageId": page_id,
                "blockId": s.block_id,
            }),
        })
        .collect()
}
