//! Database migrations for the catalog sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_01_000001_create_items;
mod m2025_06_01_000002_create_sync_states;
mod m2025_06_01_000003_create_sync_runs;
mod m2025_06_01_000004_create_checkpoints;
mod m2025_06_01_000005_create_queue_tasks;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_01_000001_create_items::Migration),
            Box::new(m2025_06_01_000002_create_sync_states::Migration),
            Box::new(m2025_06_01_000003_create_sync_runs::Migration),
            Box::new(m2025_06_01_000004_create_checkpoints::Migration),
            Box::new(m2025_06_01_000005_create_queue_tasks::Migration),
        ]
    }
}
