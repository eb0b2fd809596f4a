//! presenced: HTTP attendance daemon.
//!
//! Wires the embedding store and face embedder (owned by a dedicated engine
//! thread) to an axum router, and records check-in/out events in per-day
//! CSV files.

pub mod attendance;
pub mod config;
pub mod engine;
pub mod http;
