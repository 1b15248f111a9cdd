//! # Catalog Sync Library
//!
//! Mirrors a remote store catalog into a local item store: the incremental sync engine,
//! its persistence, the batch job queue and the management API.

pub mod checkpoint;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod repositories;
pub mod server;
pub mod source;
pub mod sync;
pub mod telemetry;
pub use migration;
