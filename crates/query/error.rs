use das_attention::AttentionError;
use das_storage::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid query: {0}")]
    InvalidInput(String),
    #[error("Invalid token string: {0}")]
    InvalidTokenString(String),
    #[error("Query cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Attention(#[from] AttentionError),
}
