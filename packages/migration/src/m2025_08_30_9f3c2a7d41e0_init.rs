//! init
//!
//! Baseline schema: users, dialogs, messages, plus the read-only grant for the
//! reporting role where that role is provisioned.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::{ColumnDef, ForeignKeyAction, Index, Table};

use crate::executor::LiveExecutor;
use crate::runner::{MigrationContext, ROLE_PROBE_QUERY};
use crate::RevisionOps;

#[derive(DeriveMigrationName, Default)]
pub struct Migration;

#[derive(Iden)]
enum Users {
    Table,
    Id,
    ExternalId,
    DisplayName,
    CreatedAt,
}

#[derive(Iden)]
enum Dialogs {
    Table,
    Id,
    UserId,
    Channel,
    StartedAt,
    ClosedAt,
}

#[derive(Iden)]
enum Messages {
    Table,
    Id,
    DialogId,
    Sender,
    Body,
    SentAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut exec = LiveExecutor::new(manager.get_connection());
        self.apply_up(&mut MigrationContext::new(&mut exec)).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let mut exec = LiveExecutor::new(manager.get_connection());
        self.apply_down(&mut MigrationContext::new(&mut exec)).await
    }
}

#[async_trait::async_trait]
impl RevisionOps for Migration {
    async fn apply_up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), DbErr> {
        ctx.create_table(
            Table::create()
                .table(Users::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(Users::Id)
                        .big_integer()
                        .not_null()
                        .primary_key()
                        .auto_increment(),
                )
                .col(ColumnDef::new(Users::ExternalId).string().not_null())
                .col(ColumnDef::new(Users::DisplayName).string().null())
                .col(
                    ColumnDef::new(Users::CreatedAt)
                        .timestamp_with_time_zone()
                        .not_null()
                        .default(Expr::current_timestamp()),
                )
                .to_owned(),
        )
        .await?;

        ctx.create_index(
            Index::create()
                .name("idx_users_external_id_unique")
                .table(Users::Table)
                .col(Users::ExternalId)
                .unique()
                .to_owned(),
        )
        .await?;

        ctx.create_table(
            Table::create()
                .table(Dialogs::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(Dialogs::Id)
                        .big_integer()
                        .not_null()
                        .primary_key()
                        .auto_increment(),
                )
                .col(ColumnDef::new(Dialogs::UserId).big_integer().not_null())
                .col(ColumnDef::new(Dialogs::Channel).string().not_null())
                .col(
                    ColumnDef::new(Dialogs::StartedAt)
                        .timestamp_with_time_zone()
                        .not_null(),
                )
                .col(
                    ColumnDef::new(Dialogs::ClosedAt)
                        .timestamp_with_time_zone()
                        .null(),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_dialogs_user")
                        .from(Dialogs::Table, Dialogs::UserId)
                        .to(Users::Table, Users::Id)
                        .on_delete(ForeignKeyAction::Cascade),
                )
                .to_owned(),
        )
        .await?;

        ctx.create_table(
            Table::create()
                .table(Messages::Table)
                .if_not_exists()
                .col(
                    ColumnDef::new(Messages::Id)
                        .big_integer()
                        .not_null()
                        .primary_key()
                        .auto_increment(),
                )
                .col(ColumnDef::new(Messages::DialogId).big_integer().not_null())
                .col(ColumnDef::new(Messages::Sender).string().not_null())
                .col(ColumnDef::new(Messages::Body).text().not_null())
                .col(
                    ColumnDef::new(Messages::SentAt)
                        .timestamp_with_time_zone()
                        .not_null(),
                )
                .foreign_key(
                    ForeignKey::create()
                        .name("fk_messages_dialog")
                        .from(Messages::Table, Messages::DialogId)
                        .to(Dialogs::Table, Dialogs::Id)
                        .on_delete(ForeignKeyAction::Cascade),
                )
                .to_owned(),
        )
        .await?;

        ctx.create_index(
            Index::create()
                .name("idx_messages_dialog_id")
                .table(Messages::Table)
                .col(Messages::DialogId)
                .to_owned(),
        )
        .await?;

        if ctx.fetch_exists(ROLE_PROBE_QUERY).await? {
            ctx.execute("GRANT SELECT ON ALL TABLES IN SCHEMA public TO grafanareader")
                .await?;
        }

        Ok(())
    }

    async fn apply_down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), DbErr> {
        ctx.drop_table(Table::drop().table(Messages::Table).if_exists().to_owned())
            .await?;
        ctx.drop_table(Table::drop().table(Dialogs::Table).if_exists().to_owned())
            .await?;
        ctx.drop_table(Table::drop().table(Users::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}
