use thiserror::Error;

/// Errors surfaced by a specification run.
///
/// Everything except `TableReflection` is fatal. Table failures are caught by
/// the reflector and reported as skipped tables instead of propagating.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Failed to list tables: {0}")]
    Enumeration(String),

    #[error("Failed to reflect table {table}: {message}")]
    TableReflection { table: String, message: String },

    #[error("Failed to write document: {0}")]
    Write(String),
}

impl SpecError {
    pub fn table(table: &str, cause: impl std::fmt::Display) -> Self {
        SpecError::TableReflection {
            table: table.to_string(),
            message: cause.to_string(),
        }
    }
}

impl From<config::ConfigError> for SpecError {
    fn from(err: config::ConfigError) -> Self {
        SpecError::Config(err.to_string())
    }
}

pub type SpecResult<T> = Result<T, SpecError>;
