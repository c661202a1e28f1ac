//! Offline/online execution glue.
//!
//! The online path records environment facts and hands the actual work to the
//! framework's `Migrator`. The offline path renders the SQL a migration run
//! would execute, with literal values, without touching the schema. Both feed
//! revisions through [`MigrationContext`], so a revision script cannot tell
//! the two apart.

use std::collections::HashMap;

use sea_orm::sea_query::{
    IndexCreateStatement, PostgresQueryBuilder, SchemaStatementBuilder, TableCreateStatement,
    TableDropStatement,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, DbErr, Statement};
use time::OffsetDateTime;
use tracing::info;

use crate::executor::{MigrationExecutor, RenderExecutor};
use crate::schema::SchemaMetadata;

/// Schema the application itself lives in. The read-only reporting role is
/// provisioned everywhere except here.
pub const APP_SCHEMA: &str = "convo_core";

/// The one probe query the offline renderer knows how to answer.
pub const ROLE_PROBE_QUERY: &str = "SELECT 1 FROM pg_roles WHERE rolname='grafanareader'";

const VERSION_TABLE: &str = "seaql_migrations";

/// Symbol filter applied when the migration context is configured. Partition
/// default tables carry a `_default` suffix and are managed outside the
/// migration history.
pub fn include_symbol(table_name: &str) -> bool {
    !table_name.contains("_default")
}

/// The metadata tables the migration context actually covers.
pub fn context_tables(metadata: &SchemaMetadata) -> Vec<&'static str> {
    metadata
        .table_names()
        .into_iter()
        .filter(|name| include_symbol(name))
        .collect()
}

/// What a revision script sees: schema operations routed through whichever
/// executor the current mode uses.
pub struct MigrationContext<'a> {
    exec: &'a mut dyn MigrationExecutor,
}

impl<'a> MigrationContext<'a> {
    pub fn new(exec: &'a mut dyn MigrationExecutor) -> Self {
        Self { exec }
    }

    pub async fn create_table(&mut self, stmt: TableCreateStatement) -> Result<(), DbErr> {
        self.exec.execute(&stmt.to_string(PostgresQueryBuilder)).await
    }

    pub async fn create_index(&mut self, stmt: IndexCreateStatement) -> Result<(), DbErr> {
        self.exec.execute(&stmt.to_string(PostgresQueryBuilder)).await
    }

    pub async fn drop_table(&mut self, stmt: TableDropStatement) -> Result<(), DbErr> {
        self.exec.execute(&stmt.to_string(PostgresQueryBuilder)).await
    }

    pub async fn execute(&mut self, sql: &str) -> Result<(), DbErr> {
        self.exec.execute(sql).await
    }

    pub async fn fetch_exists(&mut self, sql: &str) -> Result<bool, DbErr> {
        self.exec.fetch_exists(sql).await
    }
}

pub async fn current_schema<C: ConnectionTrait>(conn: &C) -> Result<String, DbErr> {
    let stmt = Statement::from_string(
        conn.get_database_backend(),
        "SELECT current_schema()::text AS schema".to_owned(),
    );
    match conn.query_one(stmt).await? {
        Some(row) => row.try_get("", "schema"),
        None => Err(DbErr::Custom("current_schema() returned no row".to_owned())),
    }
}

/// A rendered offline run: the schema that was probed, and the SQL script.
/// `sql` is empty when there is nothing to do.
#[derive(Debug)]
pub struct OfflineScript {
    pub schema: String,
    pub sql: String,
}

pub async fn render_offline_upgrade(
    conn: &DatabaseConnection,
    target: &str,
) -> Result<OfflineScript, DbErr> {
    let schema = current_schema(conn).await?;
    let entries = crate::entries();
    let target_pos = resolve_target_pos(target, "head")?;
    let applied = crate::count_applied_migrations(conn).await?;
    let (start, end) = upgrade_bounds(entries.len(), applied, target_pos);

    info!(schema = %schema, tables = ?context_tables(&SchemaMetadata), "offline context configured");

    let mut exec = RenderExecutor::new(scripted_probes(&schema));
    let applied_at = OffsetDateTime::now_utc().unix_timestamp();
    for entry in &entries[start..end] {
        entry.ops.apply_up(&mut MigrationContext::new(&mut exec)).await?;
        exec.push(format!(
            "INSERT INTO \"{VERSION_TABLE}\" (\"version\", \"applied_at\") VALUES ('{}', {applied_at})",
            entry.name
        ));
    }

    Ok(OfflineScript {
        schema,
        sql: wrap_transaction(exec.into_statements()),
    })
}

pub async fn render_offline_downgrade(
    conn: &DatabaseConnection,
    target: &str,
) -> Result<OfflineScript, DbErr> {
    let schema = current_schema(conn).await?;
    let entries = crate::entries();
    let target_pos = resolve_target_pos(target, "base")?;
    let applied = crate::count_applied_migrations(conn).await?;
    let (stop, top) = downgrade_bounds(entries.len(), applied, target_pos);

    info!(schema = %schema, tables = ?context_tables(&SchemaMetadata), "offline context configured");

    let mut exec = RenderExecutor::new(scripted_probes(&schema));
    for entry in entries[stop..top].iter().rev() {
        entry.ops.apply_down(&mut MigrationContext::new(&mut exec)).await?;
        exec.push(format!(
            "DELETE FROM \"{VERSION_TABLE}\" WHERE \"version\" = '{}'",
            entry.name
        ));
    }

    Ok(OfflineScript {
        schema,
        sql: wrap_transaction(exec.into_statements()),
    })
}

fn resolve_target_pos(target: &str, open_end: &str) -> Result<Option<usize>, DbErr> {
    if target == open_end {
        return Ok(None);
    }
    crate::position_of(target)
        .map(Some)
        .ok_or_else(|| DbErr::Migration(format!("unknown revision: {target}")))
}

fn scripted_probes(schema: &str) -> HashMap<String, bool> {
    // The reporting role is created everywhere except the application's own
    // schema, so its existence can be derived without a live catalog lookup.
    let role_exists = schema != APP_SCHEMA;
    HashMap::from([(ROLE_PROBE_QUERY.to_owned(), role_exists)])
}

/// Revisions `start..end` still have to be applied to reach the target.
fn upgrade_bounds(defined: usize, applied: usize, target_pos: Option<usize>) -> (usize, usize) {
    let end = target_pos.map(|pos| pos + 1).unwrap_or(defined).min(defined);
    (applied.min(end), end)
}

/// Revisions `stop..top` have to be reverted (in reverse order) to reach the
/// target; the target itself stays applied.
fn downgrade_bounds(defined: usize, applied: usize, target_pos: Option<usize>) -> (usize, usize) {
    let top = applied.min(defined);
    let stop = target_pos.map(|pos| pos + 1).unwrap_or(0).min(top);
    (stop, top)
}

fn wrap_transaction(statements: Vec<String>) -> String {
    if statements.is_empty() {
        return String::new();
    }
    let mut out = String::from("BEGIN;\n\n");
    for stmt in statements {
        let needs_terminator = !stmt.trim_end().ends_with(';');
        out.push_str(&stmt);
        if needs_terminator {
            out.push(';');
        }
        out.push_str("\n\n");
    }
    out.push_str("COMMIT;\n");
    out
}
