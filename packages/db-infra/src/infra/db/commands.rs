//! The migration command set. Each function maps one CLI subcommand onto the
//! migration runner, in online mode against a live connection or in offline
//! mode by printing the SQL a DBA would run by hand.

use std::fs;
use std::io::Write;

use migration::generate::{new_revision, RevisionScript};
use migration::runner::{
    context_tables, current_schema, render_offline_downgrade, render_offline_upgrade,
};
use migration::schema::SchemaMetadata;
use migration::{
    defined_names, latest_applied_version, resolve_downgrade_steps, resolve_upgrade_steps,
    Migrator, MigratorTrait,
};
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use tracing::info;

use crate::error::DbInfraError;
use crate::infra::db::migrate::MigrationConfig;
use crate::infra::db::session::with_session;

const LAST_VERSION_FILE: &str = "last_version.txt";

/// Apply revisions up to `target` ("head" or a revision name/id fragment).
/// With `sql_only` nothing touches the database beyond two read-only probes;
/// the statements are written to `out` instead.
pub async fn upgrade(
    db: &DatabaseConnection,
    config: &MigrationConfig,
    target: &str,
    sql_only: bool,
    out: &mut dyn Write,
) -> Result<(), DbInfraError> {
    if sql_only {
        let script = render_offline_upgrade(db, target).await?;
        config.record_schema(&script.schema);
        info!("migrate=offline direction=up schema={}", script.schema);
        out.write_all(script.sql.as_bytes())?;
        return Ok(());
    }

    note_schema(db, config).await?;
    let steps = resolve_upgrade_steps(db, target).await?;
    info!(
        "migrate=start direction=up target={} url={}",
        target,
        config.display_url()
    );
    Migrator::up(db, steps).await?;
    info!("migrate=done direction=up");
    Ok(())
}

/// Revert revisions down to `target` ("base" reverts everything).
pub async fn downgrade(
    db: &DatabaseConnection,
    config: &MigrationConfig,
    target: &str,
    sql_only: bool,
    out: &mut dyn Write,
) -> Result<(), DbInfraError> {
    if sql_only {
        let script = render_offline_downgrade(db, target).await?;
        config.record_schema(&script.schema);
        info!("migrate=offline direction=down schema={}", script.schema);
        out.write_all(script.sql.as_bytes())?;
        return Ok(());
    }

    note_schema(db, config).await?;
    let steps = resolve_downgrade_steps(db, target).await?;
    info!(
        "migrate=start direction=down target={} steps={} url={}",
        target,
        steps,
        config.display_url()
    );
    Migrator::down(db, Some(steps)).await?;
    info!("migrate=done direction=down");
    Ok(())
}

/// Record the schema the connection currently resolves into the shared
/// config, mirroring what the offline renderer records from its probe.
async fn note_schema(
    db: &DatabaseConnection,
    config: &MigrationConfig,
) -> Result<(), DbInfraError> {
    let schema = current_schema(db).await?;
    config.record_schema(&schema);
    Ok(())
}

/// Generate a new empty revision script and register it in the package.
/// The newest module name is mirrored into `last_version.txt` next to the
/// revision scripts so operators can tell what was generated last.
pub fn revision(config: &MigrationConfig, message: &str) -> Result<RevisionScript, DbInfraError> {
    let script = new_revision(
        &config.version_dir,
        &config.script_dir,
        message,
        &config.file_template,
        &config.post_write_hooks,
    )?;
    fs::write(
        config.version_dir.join(LAST_VERSION_FILE),
        format!("{}\n", script.module_name),
    )?;
    info!(
        "revision=created module={} path={}",
        script.module_name,
        script.path.display()
    );
    Ok(script)
}

/// One-line description of the database's current revision.
pub async fn current(db: &DatabaseConnection) -> Result<String, DbInfraError> {
    let latest = latest_applied_version(db).await?;
    Ok(describe_current(latest, defined_names().last().cloned()))
}

fn describe_current(latest: Option<String>, head: Option<String>) -> String {
    match latest {
        None => "no migration version present".to_owned(),
        Some(version) if head.as_ref() == Some(&version) => format!("{version} (head)"),
        Some(version) => version,
    }
}

/// Revision history, oldest first, with each line marked applied or pending.
pub async fn history(db: &DatabaseConnection) -> Result<Vec<String>, DbInfraError> {
    let applied = migration::applied_names(db).await?;
    Ok(describe_history(&defined_names(), &applied))
}

fn describe_history(defined: &[String], applied: &[String]) -> Vec<String> {
    defined
        .iter()
        .map(|name| {
            if applied.iter().any(|a| a == name) {
                format!("{name} (applied)")
            } else {
                format!("{name} (pending)")
            }
        })
        .collect()
}

/// Create every table in the schema metadata directly, bypassing the
/// revision history. Meant for throwaway databases.
pub async fn create_all(db: &DatabaseConnection) -> Result<(), DbInfraError> {
    let backend = db.get_database_backend();
    for stmt in SchemaMetadata.tables() {
        db.execute(backend.build(&stmt)).await?;
    }
    info!("schema=created tables={}", SchemaMetadata.table_names().len());
    Ok(())
}

/// Tear the database down in one transaction: application tables with
/// CASCADE, the version table, then the auxiliary schemas.
pub async fn drop_all(
    db: &DatabaseConnection,
    config: &MigrationConfig,
) -> Result<(), DbInfraError> {
    let statements = drop_all_statements(&config.aux_schemas);
    with_session(db, move |txn| {
        Box::pin(async move {
            let backend = txn.get_database_backend();
            for sql in &statements {
                txn.execute(Statement::from_string(backend, sql.clone())).await?;
            }
            Ok(())
        })
    })
    .await?;
    info!("schema=dropped aux_schemas={}", config.aux_schemas.join(","));
    Ok(())
}

fn drop_all_statements(aux_schemas: &[String]) -> Vec<String> {
    let metadata = SchemaMetadata;
    let mut statements = Vec::new();
    // newest table first so FK targets go last, CASCADE covers the rest
    for table in context_tables(&metadata).into_iter().rev() {
        statements.push(format!("DROP TABLE IF EXISTS \"{table}\" CASCADE"));
    }
    // partition defaults sit outside the migration context
    for table in metadata.table_names() {
        if !context_tables(&metadata).contains(&table) {
            statements.push(format!("DROP TABLE IF EXISTS \"{table}\" CASCADE"));
        }
    }
    statements.push("DROP TABLE IF EXISTS \"seaql_migrations\"".to_owned());
    for schema in aux_schemas {
        statements.push(format!("DROP SCHEMA IF EXISTS \"{schema}\" CASCADE"));
    }
    statements
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;

    use sea_orm::{DatabaseBackend, MockDatabase, Value};

    use super::{describe_current, describe_history, drop_all_statements, note_schema, revision};
    use crate::config::db::PoolSettings;
    use crate::infra::db::migrate::prepare_config;

    const LIB_FIXTURE: &str = "\
mod m2025_01_01_aaaaaaaaaaaa_init;
// generate:mod -- new revision modules are registered above this line

pub fn entries() -> Vec<RevisionEntry> {
    vec![
        entry::<m2025_01_01_aaaaaaaaaaaa_init::Migration>(),
        // generate:entry -- new revision entries are registered above this line
    ]
}
";

    #[test]
    fn current_with_nothing_applied() {
        assert_eq!(
            describe_current(None, Some("m1_init".to_owned())),
            "no migration version present"
        );
    }

    #[test]
    fn current_marks_head() {
        assert_eq!(
            describe_current(Some("m2_add".to_owned()), Some("m2_add".to_owned())),
            "m2_add (head)"
        );
        assert_eq!(
            describe_current(Some("m1_init".to_owned()), Some("m2_add".to_owned())),
            "m1_init"
        );
    }

    #[test]
    fn history_marks_applied_and_pending() {
        let defined = vec!["m1_init".to_owned(), "m2_add".to_owned()];
        let applied = vec!["m1_init".to_owned()];
        assert_eq!(
            describe_history(&defined, &applied),
            vec!["m1_init (applied)".to_owned(), "m2_add (pending)".to_owned()]
        );
    }

    #[test]
    fn drop_statements_cover_tables_version_table_and_schemas() {
        let statements = drop_all_statements(&["jobs".to_owned()]);
        assert!(statements
            .iter()
            .any(|s| s == "DROP TABLE IF EXISTS \"users\" CASCADE"));
        assert!(statements
            .iter()
            .any(|s| s == "DROP TABLE IF EXISTS \"messages_default\" CASCADE"));
        assert!(statements
            .iter()
            .any(|s| s == "DROP TABLE IF EXISTS \"seaql_migrations\""));
        assert_eq!(
            statements.last().map(String::as_str),
            Some("DROP SCHEMA IF EXISTS \"jobs\" CASCADE")
        );
    }

    #[tokio::test]
    async fn online_runs_record_the_connection_schema() {
        let dir = tempfile::tempdir().unwrap();
        let config = prepare_config(
            &PoolSettings::default(),
            dir.path().to_path_buf(),
            dir.path().join("versions"),
        )
        .unwrap();

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([[BTreeMap::from([("schema", Value::from("convo_core"))])]])
            .into_connection();

        assert_eq!(config.recorded_schema(), None);
        note_schema(&db, &config).await.unwrap();
        assert_eq!(config.recorded_schema(), Some("convo_core".to_owned()));
    }

    #[test]
    fn revision_overwrites_the_last_version_marker() {
        let dir = tempfile::tempdir().unwrap();
        let script_dir = dir.path().join("src");
        let version_dir = script_dir.join("versions");
        fs::create_dir_all(&version_dir).unwrap();
        fs::write(script_dir.join("lib.rs"), LIB_FIXTURE).unwrap();

        let config = prepare_config(
            &PoolSettings::default(),
            script_dir.clone(),
            version_dir.clone(),
        )
        .unwrap();

        let marker = version_dir.join("last_version.txt");
        let first = revision(&config, "add users").unwrap();
        assert_eq!(
            fs::read_to_string(&marker).unwrap(),
            format!("{}\n", first.module_name)
        );

        let second = revision(&config, "add users").unwrap();
        assert_ne!(first.module_name, second.module_name);
        assert_eq!(
            fs::read_to_string(&marker).unwrap(),
            format!("{}\n", second.module_name)
        );
        // the marker lives next to the revision scripts, not next to lib.rs
        assert!(!script_dir.join("last_version.txt").exists());
    }

    #[test]
    fn application_tables_drop_before_the_version_table() {
        let statements = drop_all_statements(&[]);
        let users = statements
            .iter()
            .position(|s| s.contains("\"users\""))
            .unwrap();
        let version = statements
            .iter()
            .position(|s| s.contains("seaql_migrations"))
            .unwrap();
        assert!(users < version);
    }
}
