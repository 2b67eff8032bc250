use das_common::{CommonError, Handle};
use das_trie::TrieError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid atom: {0}")]
    InvalidInput(String),
    #[error("Atom already exists: {0}")]
    AlreadyExists(Handle),
    #[error("Atom not found: {0}")]
    NotFound(Handle),
    #[error("Atom still referenced by links: {0}")]
    InUse(Handle),
    #[error(transparent)]
    Hash(#[from] CommonError),
    #[error(transparent)]
    Trie(#[from] TrieError),
}
