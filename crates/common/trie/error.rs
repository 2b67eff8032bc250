use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrieError {
    #[error("Invalid key size: {0}")]
    InvalidKeySize(usize),
    #[error("Invalid key character: {0:?}")]
    InvalidKeyChar(char),
}
