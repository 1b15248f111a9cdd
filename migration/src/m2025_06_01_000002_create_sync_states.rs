//! Migration to create the sync_states table.
//!
//! One row per `(store_id, sync_type)`. The current run is flattened into columns so every
//! progress mutation can be expressed as a single atomic column update.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncStates::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncStates::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncStates::StoreId).text().not_null())
                    .col(ColumnDef::new(SyncStates::SyncType).text().not_null())
                    .col(counter(SyncStates::TotalSyncs))
                    .col(counter(SyncStates::TotalProcessed))
                    .col(counter(SyncStates::TotalCreated))
                    .col(counter(SyncStates::TotalUpdated))
                    .col(counter(SyncStates::TotalDeleted))
                    .col(
                        ColumnDef::new(SyncStates::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(flag(SyncStates::IsInProgress))
                    .col(flag(SyncStates::CancelRequested))
                    .col(ColumnDef::new(SyncStates::LastSyncError).text().null())
                    .col(ColumnDef::new(SyncStates::RunId).uuid().null())
                    .col(ColumnDef::new(SyncStates::RunMode).text().null())
                    .col(
                        ColumnDef::new(SyncStates::RunStartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncStates::RunCompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(counter(SyncStates::RunTotalToProcess))
                    .col(counter(SyncStates::RunProcessed))
                    .col(counter(SyncStates::RunCreated))
                    .col(counter(SyncStates::RunUpdated))
                    .col(counter(SyncStates::RunDeleted))
                    .col(counter(SyncStates::RunFailed))
                    .col(counter(SyncStates::RunDuplicates))
                    .col(flag(SyncStates::RunEnumerationDone))
                    .col(flag(SyncStates::RunWatermarkEligible))
                    .col(small_counter(SyncStates::BatchTotal))
                    .col(small_counter(SyncStates::BatchCompleted))
                    .col(small_counter(SyncStates::BatchFailed))
                    .col(small_counter(SyncStates::BatchPending))
                    .col(ColumnDef::new(SyncStates::BatchIds).json_binary().null())
                    .col(
                        ColumnDef::new(SyncStates::PreSyncExistingIds)
                            .json_binary()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncStates::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncStates::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_sync_states_store_type")
                    .table(SyncStates::Table)
                    .col(SyncStates::StoreId)
                    .col(SyncStates::SyncType)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Sweeper scans for runs that have been in progress too long
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_states_in_progress_started")
                    .table(SyncStates::Table)
                    .col(SyncStates::IsInProgress)
                    .col(SyncStates::RunStartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_states_in_progress_started")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("uq_sync_states_store_type").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncStates::Table).to_owned())
            .await
    }
}

fn counter(col: SyncStates) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .default(0)
        .to_owned()
}

fn small_counter(col: SyncStates) -> ColumnDef {
    ColumnDef::new(col).integer().not_null().default(0).to_owned()
}

fn flag(col: SyncStates) -> ColumnDef {
    ColumnDef::new(col)
        .boolean()
        .not_null()
        .default(false)
        .to_owned()
}

#[derive(DeriveIden)]
enum SyncStates {
    Table,
    Id,
    StoreId,
    SyncType,
    TotalSyncs,
    TotalProcessed,
    TotalCreated,
    TotalUpdated,
    TotalDeleted,
    LastSyncedAt,
    IsInProgress,
    CancelRequested,
    LastSyncError,
    RunId,
    RunMode,
    RunStartedAt,
    RunCompletedAt,
    RunTotalToProcess,
    RunProcessed,
    RunCreated,
    RunUpdated,
    RunDeleted,
    RunFailed,
    RunDuplicates,
    RunEnumerationDone,
    RunWatermarkEligible,
    BatchTotal,
    BatchCompleted,
    BatchFailed,
    BatchPending,
    BatchIds,
    PreSyncExistingIds,
    CreatedAt,
    UpdatedAt,
}
