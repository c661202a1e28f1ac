//! Execution adapters for revision scripts.
//!
//! Revisions never talk to a connection directly; they go through a
//! [`MigrationExecutor`]. The live implementation applies SQL against the
//! database, the render implementation collects the SQL text for offline
//! scripts and answers probe queries from a scripted result set.

use std::collections::HashMap;

use sea_orm::{ConnectionTrait, DbErr, Statement};
use tracing::warn;

#[async_trait::async_trait]
pub trait MigrationExecutor: Send {
    /// Run one SQL statement.
    async fn execute(&mut self, sql: &str) -> Result<(), DbErr>;

    /// Run a query and report whether it returned at least one row.
    async fn fetch_exists(&mut self, sql: &str) -> Result<bool, DbErr>;
}

/// Applies SQL against a live connection (the online path of the framework).
pub struct LiveExecutor<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> LiveExecutor<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }
}

#[async_trait::async_trait]
impl<C: ConnectionTrait> MigrationExecutor for LiveExecutor<'_, C> {
    async fn execute(&mut self, sql: &str) -> Result<(), DbErr> {
        self.conn.execute_unprepared(sql).await.map(|_| ())
    }

    async fn fetch_exists(&mut self, sql: &str) -> Result<bool, DbErr> {
        let stmt = Statement::from_string(self.conn.get_database_backend(), sql.to_owned());
        Ok(self.conn.query_one(stmt).await?.is_some())
    }
}

/// Collects SQL text instead of executing it (the offline path).
///
/// Probe queries are answered from the scripted map, keyed by the exact query
/// string. Anything else is assumed to return no row. The probe query itself
/// is still emitted into the rendered script, matching what the framework
/// prints for an executed statement.
#[derive(Default)]
pub struct RenderExecutor {
    statements: Vec<String>,
    scripted: HashMap<String, bool>,
}

impl RenderExecutor {
    pub fn new(scripted: HashMap<String, bool>) -> Self {
        Self {
            statements: Vec::new(),
            scripted,
        }
    }

    /// Append a raw statement without going through the executor interface.
    /// Used for version-table bookkeeping.
    pub fn push(&mut self, sql: impl Into<String>) {
        self.statements.push(sql.into());
    }

    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }
}

#[async_trait::async_trait]
impl MigrationExecutor for RenderExecutor {
    async fn execute(&mut self, sql: &str) -> Result<(), DbErr> {
        self.statements.push(sql.to_owned());
        Ok(())
    }

    async fn fetch_exists(&mut self, sql: &str) -> Result<bool, DbErr> {
        self.statements.push(sql.to_owned());
        match self.scripted.get(sql) {
            Some(result) => Ok(*result),
            None => {
                warn!(query = sql, "offline probe is not scripted, assuming no row");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{MigrationExecutor, RenderExecutor};

    #[tokio::test]
    async fn render_executor_collects_statements_in_order() {
        let mut exec = RenderExecutor::default();
        exec.execute("CREATE TABLE a (id bigint)").await.unwrap();
        exec.execute("DROP TABLE a").await.unwrap();
        assert_eq!(
            exec.into_statements(),
            vec!["CREATE TABLE a (id bigint)", "DROP TABLE a"]
        );
    }

    #[tokio::test]
    async fn scripted_probe_answers_exact_query_only() {
        let scripted = HashMap::from([("SELECT 1 FROM pg_roles".to_string(), true)]);
        let mut exec = RenderExecutor::new(scripted);

        assert!(exec.fetch_exists("SELECT 1 FROM pg_roles").await.unwrap());
        assert!(!exec.fetch_exists("SELECT 2 FROM pg_roles").await.unwrap());

        // both probes still show up in the rendered output
        assert_eq!(exec.into_statements().len(), 2);
    }
}
