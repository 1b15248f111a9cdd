//! # Data Models
//!
//! This module contains all the data models used throughout the catalog sync service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod checkpoint;
pub mod item;
pub mod queue_task;
pub mod sync_run;
pub mod sync_run_error;
pub mod sync_state;

pub use checkpoint::Entity as Checkpoint;
pub use item::Entity as Item;
pub use queue_task::Entity as QueueTask;
pub use sync_run::Entity as SyncRun;
pub use sync_run_error::Entity as SyncRunError;
pub use sync_state::Entity as SyncState;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "catalog-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
