//! Application error types with proper error chaining.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Query execution failed: {0}")]
    Query(String),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Duplicate record: {0}")]
    Duplicate(String),
    #[error("Pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Failures reported by (or while talking to) the remote wallet service.
#[derive(Error, Debug, Clone)]
pub enum RemoteServiceError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Timeout: {0}")]
    Timeout(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Insufficient funds for transaction")]
    InsufficientFunds,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
    #[error("Validation failed: {0}")]
    Multiple(String),
}

impl ValidationError {
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Coarse error classes surfaced to operators and callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RemoteService,
    Validation,
    NotFound,
    Persistence,
    PartialAggregation,
    Internal,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    RemoteService(#[from] RemoteServiceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Partial aggregation: {loaded} wallet(s) loaded, {failed} failed")]
    PartialAggregation { loaded: usize, failed: usize },
    /// A pipeline step failed; `completed` lists the steps whose side effects stand.
    #[error("Pipeline '{pipeline}' failed at {step} (step {position}): {source}")]
    StepFailed {
        pipeline: &'static str,
        step: &'static str,
        position: usize,
        completed: Vec<&'static str>,
        source: Box<AppError>,
    },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Classifies the error, looking through pipeline step wrappers.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Database(DatabaseError::NotFound(_)) => ErrorKind::NotFound,
            AppError::Database(_) => ErrorKind::Persistence,
            AppError::RemoteService(_) => ErrorKind::RemoteService,
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::NotFound { .. } => ErrorKind::NotFound,
            AppError::PartialAggregation { .. } => ErrorKind::PartialAggregation,
            AppError::StepFailed { source, .. } => source.kind(),
            AppError::Config(_)
            | AppError::Serialization(_)
            | AppError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Name of the pipeline step that failed, if this error came out of a pipeline.
    #[must_use]
    pub fn failed_step(&self) -> Option<&'static str> {
        match self {
            AppError::StepFailed { step, .. } => Some(step),
            _ => None,
        }
    }

    /// Steps that completed before the failure, for reconciliation of orphaned
    /// remote resources.
    #[must_use]
    pub fn completed_steps(&self) -> &[&'static str] {
        match self {
            AppError::StepFailed { completed, .. } => completed,
            _ => &[],
        }
    }

    /// The innermost error, with step wrappers removed.
    #[must_use]
    pub fn root(&self) -> &AppError {
        match self {
            AppError::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(ValidationError::Multiple(err.to_string()))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Row not found".to_string()),
            sqlx::Error::PoolTimedOut => DatabaseError::PoolExhausted("Pool timed out".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.code().is_some_and(|code| code == "23505") {
                    return DatabaseError::Duplicate(db_err.message().to_string());
                }
                DatabaseError::Query(db_err.message().to_string())
            }
            _ => DatabaseError::Query(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for AppError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        AppError::Database(DatabaseError::Migration(err.to_string()))
    }
}

impl From<reqwest::Error> for RemoteServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteServiceError::Timeout(err.to_string())
        } else if err.is_connect() {
            RemoteServiceError::Connection(err.to_string())
        } else if err.is_decode() {
            RemoteServiceError::InvalidResponse(err.to_string())
        } else {
            RemoteServiceError::Rejected(err.to_string())
        }
    }
}
