//! Migration to create the checkpoints table.
//!
//! Checkpoints are append-only; the autoincrement id breaks ties between rows written in the
//! same instant so "latest" is always well defined.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Checkpoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Checkpoints::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Checkpoints::JobId).uuid().not_null())
                    .col(ColumnDef::new(Checkpoints::LastProcessedId).text().null())
                    .col(ColumnDef::new(Checkpoints::Stage).text().not_null())
                    .col(ColumnDef::new(Checkpoints::Metadata).json_binary().null())
                    .col(
                        ColumnDef::new(Checkpoints::CreatedAt)
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
                    .name("idx_checkpoints_job_created")
                    .table(Checkpoints::Table)
                    .col(Checkpoints::JobId)
                    .col(Checkpoints::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_checkpoints_job_created").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Checkpoints::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Checkpoints {
    Table,
    Id,
    JobId,
    LastProcessedId,
    Stage,
    Metadata,
    CreatedAt,
}
