use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbInfraError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("invalid value for setting {field}: {value}: {reason}")]
    InvalidSetting {
        field: String,
        value: String,
        reason: String,
    },

    #[error("unknown pool strategy: {value}")]
    UnknownPoolStrategy { value: String },

    #[error(transparent)]
    Db(#[from] DbErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
