//! Migration configuration assembled from pool settings and the on-disk
//! layout of the migration package.

use std::path::PathBuf;
use std::sync::Mutex;

use migration::generate::{PostWriteHook, DEFAULT_FILE_TEMPLATE};

use crate::config::db::PoolSettings;
use crate::error::DbInfraError;
use crate::infra::db::engine::sanitize_db_url;

/// Schemas dropped alongside the application tables. These hold queue and
/// job state owned by sidecar processes, not by the revision history.
pub const DEFAULT_AUX_SCHEMAS: &[&str] = &["jobs"];

/// Everything the migration commands need beyond a live connection: where
/// revision sources live, how new files are named, and which auxiliary
/// schemas a full teardown removes.
#[derive(Debug)]
pub struct MigrationConfig {
    pub db_url: String,
    pub version_dir: PathBuf,
    pub script_dir: PathBuf,
    pub file_template: String,
    pub aux_schemas: Vec<String>,
    pub post_write_hooks: Vec<PostWriteHook>,
    // schema observed by the last upgrade/downgrade run, from the live
    // connection when online and from the probe when rendering offline
    schema: Mutex<Option<String>>,
}

impl MigrationConfig {
    pub fn record_schema(&self, schema: &str) {
        if let Ok(mut slot) = self.schema.lock() {
            *slot = Some(schema.to_owned());
        }
    }

    pub fn recorded_schema(&self) -> Option<String> {
        self.schema.lock().ok().and_then(|slot| slot.clone())
    }

    /// URL with the password masked, for logs and error messages.
    pub fn display_url(&self) -> String {
        sanitize_db_url(&self.db_url)
    }
}

/// Build the command configuration. `script_dir` is the migration package
/// source root; `version_dir` is where individual revision files live.
pub fn prepare_config(
    settings: &PoolSettings,
    script_dir: PathBuf,
    version_dir: PathBuf,
) -> Result<MigrationConfig, DbInfraError> {
    if !script_dir.is_dir() {
        return Err(DbInfraError::Config {
            message: format!(
                "migration script directory does not exist: {}",
                script_dir.display()
            ),
        });
    }

    Ok(MigrationConfig {
        db_url: settings.url.clone(),
        version_dir,
        script_dir,
        file_template: DEFAULT_FILE_TEMPLATE.to_owned(),
        aux_schemas: DEFAULT_AUX_SCHEMAS.iter().map(|s| (*s).to_owned()).collect(),
        post_write_hooks: Vec::new(),
        schema: Mutex::new(None),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::prepare_config;
    use crate::config::db::PoolSettings;
    use crate::error::DbInfraError;

    #[test]
    fn missing_script_dir_is_a_config_error() {
        let settings = PoolSettings::default();
        let err = prepare_config(
            &settings,
            PathBuf::from("/nonexistent/migrations"),
            PathBuf::from("/nonexistent/migrations/versions"),
        )
        .unwrap_err();
        assert!(matches!(err, DbInfraError::Config { ref message }
            if message.contains("/nonexistent/migrations")));
    }

    #[test]
    fn config_carries_url_and_default_aux_schemas() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PoolSettings {
            url: "postgresql://convo:secret@db/convo".to_owned(),
            ..PoolSettings::default()
        };
        let config = prepare_config(
            &settings,
            dir.path().to_path_buf(),
            dir.path().join("versions"),
        )
        .unwrap();
        assert_eq!(config.db_url, settings.url);
        assert_eq!(config.aux_schemas, vec!["jobs".to_owned()]);
        assert_eq!(config.display_url(), "postgresql://convo:***@db/convo");
    }

    #[test]
    fn recorded_schema_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = prepare_config(
            &PoolSettings::default(),
            dir.path().to_path_buf(),
            dir.path().join("versions"),
        )
        .unwrap();
        assert_eq!(config.recorded_schema(), None);
        config.record_schema("convo_core");
        assert_eq!(config.recorded_schema(), Some("convo_core".to_owned()));
    }
}
