use std::num::ParseFloatError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    /// The customer's billing table has not been created yet. Expected for
    /// freshly onboarded accounts.
    #[error("billing table not found for customer {customer_id}")]
    NoTable { customer_id: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("recommendation error: {0}")]
    Recommendation(String),

    #[error("invalid {field} amount: {source}")]
    ParseAmount {
        field: &'static str,
        #[source]
        source: ParseFloatError,
    },

    #[error("{failed} of {total} customer updates failed")]
    Partial { failed: usize, total: usize },

    #[error("storage lock poisoned")]
    LockPoisoned,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Sql(#[from] rusqlite::Error),

    #[error(transparent)]
    Settings(#[from] ::config::ConfigError),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}

impl AppError {
    pub fn is_no_table(&self) -> bool {
        matches!(self, AppError::NoTable { .. })
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::Config(_) | AppError::ParseAmount { .. } | AppError::Settings(_)
        )
    }
}
