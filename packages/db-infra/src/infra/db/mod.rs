pub mod commands;
pub mod engine;
pub mod migrate;
pub mod overflow;
pub mod session;

pub use engine::{create_engine, sanitize_db_url, setup_db, EngineOverrides};
pub use migrate::{prepare_config, MigrationConfig};
pub use overflow::OverflowObserver;
pub use session::with_session;
