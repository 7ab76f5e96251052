//! Session Lens - one view over the session logs of AI coding tools.
//!
//! Ingests the on-disk session files written by Claude Code, Codex CLI,
//! and Gemini CLI, serves normalized metadata and messages out of bounded
//! incremental caches, and watches for changes with a tiered
//! hot/cold/frozen strategy that stays cheap as tracked sessions grow
//! into the hundreds.

pub mod cache;
pub mod config;
pub mod model;
pub mod sources;
pub mod watcher;
