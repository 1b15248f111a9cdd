//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for the item store, sync state records and execution history.

pub mod item;
pub mod sync_run;
pub mod sync_state;

pub use item::{ItemRecord, ItemRepository, ItemStats, UpsertOutcome};
pub use sync_run::SyncRunRepository;
pub use sync_state::{ProgressDelta, RunClose, SyncStateRepository};
