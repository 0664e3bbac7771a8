//! # Draft Harness Core
//!
//! Pure, I/O-free logic for Draft Harness: data models, record
//! normalization and fingerprinting, theme classification, prompt
//! assembly, the clarification state machine, and the storage trait.
//!
//! This crate contains no tokio, sqlx, subprocess, or network
//! dependencies. Everything here is a deterministic transform over
//! in-memory values, which keeps it testable without fixtures.
//!
//! ## Data Flow
//!
//! ```text
//! RawRecord ──▶ normalize ──▶ ContentItem ──▶ prompt ──▶ agent ──▶ BlogPost
//!                 (dedup)       (+theme)       (budget)
//! ```

pub mod clarify;
pub mod models;
pub mod normalize;
pub mod prompt;
pub mod store;
pub mod theme;
