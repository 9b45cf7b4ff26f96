// Gaffer application library: configuration, ingestion, persistence and the
// per-gameweek pipeline around gaffer-core.

pub mod config;
pub mod ingest;
pub mod pipeline;
pub mod store;
