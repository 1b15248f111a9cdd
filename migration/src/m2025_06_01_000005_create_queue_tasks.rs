//! Migration to create the queue_tasks table.
//!
//! This is the durable ledger behind the job queue: tasks are claimed with a lease id,
//! retried with backoff, and kept after completion so queue statistics survive restarts.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(QueueTasks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(QueueTasks::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(QueueTasks::Queue).text().not_null())
                    .col(ColumnDef::new(QueueTasks::CorrelationId).uuid().null())
                    .col(ColumnDef::new(QueueTasks::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(QueueTasks::Status)
                            .text()
                            .not_null()
                            .default("queued"),
                    )
                    .col(
                        ColumnDef::new(QueueTasks::Priority)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(QueueTasks::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(QueueTasks::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(3),
                    )
                    .col(
                        ColumnDef::new(QueueTasks::ScheduledAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(QueueTasks::RetryAfter)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(QueueTasks::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(QueueTasks::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(QueueTasks::LeaseId).uuid().null())
                    .col(ColumnDef::new(QueueTasks::Output).json_binary().null())
                    .col(ColumnDef::new(QueueTasks::Error).json_binary().null())
                    .col(
                        ColumnDef::new(QueueTasks::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(QueueTasks::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim order: highest priority first, then oldest schedule
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_queue_tasks_claim ON queue_tasks (queue, status, scheduled_at, priority DESC)".to_string(),
            ))
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_queue_tasks_correlation")
                    .table(QueueTasks::Table)
                    .col(QueueTasks::CorrelationId)
                    .col(QueueTasks::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_queue_tasks_claim").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_queue_tasks_correlation").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(QueueTasks::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum QueueTasks {
    Table,
    Id,
    Queue,
    CorrelationId,
    Payload,
    Status,
    Priority,
    Attempts,
    MaxAttempts,
    ScheduledAt,
    RetryAfter,
    StartedAt,
    FinishedAt,
    LeaseId,
    Output,
    Error,
    CreatedAt,
    UpdatedAt,
}
