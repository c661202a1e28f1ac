//! Shared database configuration and migration infrastructure.
//! Used by the convo backend services and the `db` CLI.

pub mod config;
pub mod error;
pub mod infra;

pub use config::db::{PoolSettings, PoolStrategy};
pub use error::DbInfraError;
pub use infra::db::commands;
pub use infra::db::engine::{create_engine, setup_db, EngineOverrides};
pub use infra::db::migrate::{prepare_config, MigrationConfig};
pub use infra::db::session::with_session;
