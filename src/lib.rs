//! # Draft Harness
//!
//! Turns the work history of a team (git commits, Notion pages) into
//! blog-post drafts written by a local AI writing agent.
//!
//! A *session* groups the sources a post should be written from, together
//! with tone/format/provider defaults. Generating a draft re-ingests those
//! sources, normalizes and themes the records, decides whether the caller
//! must answer clarifying questions first, builds a citation-bearing prompt
//! and streams it through an agent CLI. Every draft and every manual edit is
//! kept as an immutable revision.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │ Connectors  │──▶│  Normalize   │──▶│  SQLite  │
//! │ Git/Notion  │   │ dedup+theme  │   │  Store   │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                      ┌────────────────────┤
//!                      ▼                    ▼
//!              ┌──────────────┐      ┌────────────┐
//!              │ Clarification│─────▶│  Prompt +  │──▶ post + revision
//!              │   preflight  │      │   Agent    │
//!              └──────────────┘      └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! draft init
//! draft source add-git api --repo ../api
//! draft session create --title "Sprint 12 회고"
//! draft session attach <session> api
//! draft generate <session> --stream
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`sqlite_store`] | SQLite implementation of [`store::Store`] |
//! | [`connector_git`] | Git commit-log connector |
//! | [`connector_notion`] | Notion page connector |
//! | [`ingest`] | Connector → normalize → store pipeline |
//! | [`agent`] | Agent CLI runner, mock agent and provider registry |
//! | [`generate`] | Generation orchestrator |
//! | [`posts`] | Manual edits and revision history |
//! | [`error`] | Request-level errors |
//!
//! Pure logic (models, normalization, themes, prompts, clarification and the
//! storage trait) lives in the `draft-harness-core` crate and is re-exported
//! here.

pub mod agent;
pub mod config;
pub mod connector_git;
pub mod connector_notion;
pub mod db;
pub mod error;
pub mod generate;
pub mod ingest;
pub mod migrate;
pub mod posts;
pub mod sqlite_store;

pub use draft_harness_core::{clarify, models, normalize, prompt, store, theme};
