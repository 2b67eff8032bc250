use das_trie::TrieError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttentionError {
    #[error("Missing 'SUM' key in handle count request")]
    MissingSum,
    #[error("Attention service is disabled")]
    ServiceDisabled,
    #[error("Attention backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error(transparent)]
    Trie(#[from] TrieError),
}
