use opensilicon_core::DbError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DrcError {
    #[error("Invalid DRC configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid rule #{index}: {message}")]
    InvalidRule { index: usize, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Layout database error: {0}")]
    Database(#[from] DbError),
}
