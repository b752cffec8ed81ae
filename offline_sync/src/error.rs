use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Local store error: {0}")]
    Store(#[from] sqlx::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Invalid action: {0}")]
    InvalidAction(String),
    #[error("Invalid item: {0}")]
    InvalidItem(String),
}
