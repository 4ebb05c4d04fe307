//! Migration to create the alerts table.
//!
//! Alerts are keyed by id, unique per originating scored event, and indexed by
//! `(tenant_scope, status)` so pull queries stay tenant-local.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alerts::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Alerts::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Alerts::SourceEventId).text().not_null())
                    .col(ColumnDef::new(Alerts::TenantScope).uuid().not_null())
                    .col(ColumnDef::new(Alerts::OwnerId).text().null())
                    .col(ColumnDef::new(Alerts::Severity).text().not_null())
                    .col(ColumnDef::new(Alerts::Score).double().not_null())
                    .col(
                        ColumnDef::new(Alerts::Status)
                            .text()
                            .not_null()
                            .default("open"),
                    )
                    .col(ColumnDef::new(Alerts::Assignee).text().null())
                    .col(
                        ColumnDef::new(Alerts::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Alerts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Alerts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Idempotent creation relies on this constraint, not on caller-side locking
        manager
            .create_index(
                Index::create()
                    .name("idx_alerts_source_event_id_unique")
                    .table(Alerts::Table)
                    .col(Alerts::SourceEventId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alerts_tenant_status")
                    .table(Alerts::Table)
                    .col(Alerts::TenantScope)
                    .col(Alerts::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_alerts_tenant_owner")
                    .table(Alerts::Table)
                    .col(Alerts::TenantScope)
                    .col(Alerts::OwnerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_alerts_tenant_owner",
            "idx_alerts_tenant_status",
            "idx_alerts_source_event_id_unique",
        ] {
            manager
                .drop_index(Index::drop().name(name).table(Alerts::Table).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(Alerts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Alerts {
    Table,
    Id,
    SourceEventId,
    TenantScope,
    OwnerId,
    Severity,
    Score,
    Status,
    Assignee,
    Version,
    CreatedAt,
    UpdatedAt,
}
