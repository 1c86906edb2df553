use thiserror::Error;

use crate::models::CredentialCategory;

/// Failures raised inside the ingestion pipelines
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0} API key not found in credentials table")]
    CredentialNotFound(CredentialCategory),

    #[error("{step} request failed: {reason}")]
    UpstreamUnavailable { step: String, reason: String },

    #[error("Max retries exceeded after {attempts} attempts: {last_error}")]
    UpstreamExhausted { attempts: u32, last_error: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No usable records in dataset: {0}")]
    EmptyDataset(String),

    #[error("DART code not found for stock: {0}")]
    UnmappedStock(String),

    #[error("No financial data could be retrieved for stock: {0}")]
    NoDataAvailable(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database operation failed: {0}")]
    PersistenceFailure(#[from] sqlx::Error),

    #[error("Archive store error: {0}")]
    Archive(#[from] std::io::Error),
}

impl SyncError {
    pub fn upstream(step: &str, reason: impl ToString) -> Self {
        SyncError::UpstreamUnavailable {
            step: step.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Pipeline step the failure is attributed to, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            SyncError::CredentialNotFound(_) => Some("credentials"),
            SyncError::UpstreamUnavailable { step, .. } => Some(step),
            SyncError::UpstreamExhausted { .. } => Some("fetch"),
            SyncError::PersistenceFailure(_) => Some("persist"),
            SyncError::Archive(_) => Some("archive"),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
