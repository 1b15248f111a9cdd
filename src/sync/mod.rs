//! # Catalog Sync
//!
//! The sync engine: option resolution, the orchestrator state machine, batch processing
//! (inline or through the job queue), run finalization and the stale-run sweeper.

pub mod batch;
pub mod finalize;
pub mod options;
pub mod orchestrator;
pub mod sweeper;
pub mod tracker;
pub mod transform;

pub use batch::{BatchProcessor, BatchReport, BatchTaskPayload, BatchWorker};
pub use finalize::{RunFinalizer, batch_failure_summary};
pub use options::{SyncOptions, SyncOptionsInput};
pub use orchestrator::{PreparedRun, RunSummary, RunawayGuard, StopReason, SyncOrchestrator};
pub use sweeper::{StaleRunSweeper, SweepStats};
pub use tracker::ExecutionTracker;
