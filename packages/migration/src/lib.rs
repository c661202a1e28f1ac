pub use sea_orm_migration::prelude::*;
pub use sea_orm::{ConnectionTrait, DatabaseConnection};

pub mod executor;
pub mod generate;
pub mod runner;
pub mod schema;

mod m2025_08_30_9f3c2a7d41e0_init;
// generate:mod -- new revision modules are registered above this line

use runner::MigrationContext;

/// The operations of one revision, expressed against a [`MigrationContext`]
/// so that the online and offline paths run the same code.
#[async_trait::async_trait]
pub trait RevisionOps: Send + Sync {
    async fn apply_up(&self, ctx: &mut MigrationContext<'_>) -> Result<(), DbErr>;
    async fn apply_down(&self, ctx: &mut MigrationContext<'_>) -> Result<(), DbErr>;
}

/// One registered revision: its name, the framework-facing migration, and the
/// mode-independent operations.
pub struct RevisionEntry {
    pub name: String,
    pub migration: Box<dyn MigrationTrait>,
    pub ops: Box<dyn RevisionOps>,
}

fn entry<M>() -> RevisionEntry
where
    M: MigrationTrait + RevisionOps + Default + 'static,
{
    RevisionEntry {
        name: M::default().name().to_owned(),
        migration: Box::new(M::default()),
        ops: Box::new(M::default()),
    }
}

pub fn entries() -> Vec<RevisionEntry> {
    vec![
        entry::<m2025_08_30_9f3c2a7d41e0_init::Migration>(),
        // generate:entry -- new revision entries are registered above this line
    ]
}

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        entries().into_iter().map(|e| e.migration).collect()
    }
}

pub fn defined_names() -> Vec<String> {
    entries().into_iter().map(|e| e.name).collect()
}

/// Find a revision by full name or id fragment.
pub fn position_of(target: &str) -> Option<usize> {
    defined_names()
        .iter()
        .position(|name| name == target || name.contains(target))
}

/// Names of the migrations recorded as applied, oldest first.
/// Returns an empty list if the version table does not exist yet.
pub async fn applied_names(db: &DatabaseConnection) -> Result<Vec<String>, DbErr> {
    match Migrator::get_applied_migrations(db).await {
        Ok(migrations) => Ok(migrations.iter().map(|m| m.name().to_owned()).collect()),
        Err(DbErr::Exec(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

pub async fn count_applied_migrations(db: &DatabaseConnection) -> Result<usize, DbErr> {
    Ok(applied_names(db).await?.len())
}

/// Version string of the latest applied migration, if any.
pub async fn latest_applied_version(db: &DatabaseConnection) -> Result<Option<String>, DbErr> {
    Ok(applied_names(db).await?.pop())
}

/// Translate a target revision name into a step count for `Migrator::up`.
/// `None` means run everything pending ("head").
pub async fn resolve_upgrade_steps(
    db: &DatabaseConnection,
    target: &str,
) -> Result<Option<u32>, DbErr> {
    if target == "head" {
        return Ok(None);
    }
    let pos = position_of(target)
        .ok_or_else(|| DbErr::Migration(format!("unknown revision: {target}")))?;
    let applied = count_applied_migrations(db).await?;
    Ok(Some((pos + 1).saturating_sub(applied) as u32))
}

/// Number of revisions to revert so the target stays the newest applied one.
/// "base" reverts the whole history.
pub async fn resolve_downgrade_steps(db: &DatabaseConnection, target: &str) -> Result<u32, DbErr> {
    let applied = count_applied_migrations(db).await?;
    if target == "base" {
        return Ok(applied as u32);
    }
    let pos = position_of(target)
        .ok_or_else(|| DbErr::Migration(format!("unknown revision: {target}")))?;
    Ok(applied.saturating_sub(pos + 1) as u32)
}
