//! Schema metadata for the convo service.
//!
//! This is the table inventory that `create-all` and `drop-all` operate on
//! directly, bypassing the migration framework. `messages_default` is the
//! partition stand-in table; it is created with everything else but excluded
//! from the migration context by the runner's symbol filter.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::{ColumnDef, ForeignKeyAction, Table};

#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    ExternalId,
    DisplayName,
    CreatedAt,
}

#[derive(Iden)]
pub enum Dialogs {
    Table,
    Id,
    UserId,
    Channel,
    StartedAt,
    ClosedAt,
}

#[derive(Iden)]
pub enum Messages {
    Table,
    Id,
    DialogId,
    Sender,
    Body,
    SentAt,
}

#[derive(Iden)]
pub enum MessagesDefault {
    Table,
    Id,
    DialogId,
    Sender,
    Body,
    SentAt,
}

/// Opaque handle over the application's table definitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaMetadata;

impl SchemaMetadata {
    pub fn tables(&self) -> Vec<TableCreateStatement> {
        vec![
            users_table(),
            dialogs_table(),
            messages_table(),
            messages_default_table(),
        ]
    }

    pub fn table_names(&self) -> Vec<&'static str> {
        vec!["users", "dialogs", "messages", "messages_default"]
    }
}

fn users_table() -> TableCreateStatement {
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
        .to_owned()
}

fn dialogs_table() -> TableCreateStatement {
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
        .to_owned()
}

fn messages_table() -> TableCreateStatement {
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
        .to_owned()
}

fn messages_default_table() -> TableCreateStatement {
    Table::create()
        .table(MessagesDefault::Table)
        .if_not_exists()
        .col(
            ColumnDef::new(MessagesDefault::Id)
                .big_integer()
                .not_null()
                .primary_key()
                .auto_increment(),
        )
        .col(
            ColumnDef::new(MessagesDefault::DialogId)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(MessagesDefault::Sender).string().not_null())
        .col(ColumnDef::new(MessagesDefault::Body).text().not_null())
        .col(
            ColumnDef::new(MessagesDefault::SentAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned()
}
