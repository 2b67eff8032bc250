use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommonError {
    #[error("Input too large to hash: {0} bytes")]
    InputTooLarge(usize),
    #[error("Invalid handle: {0:?}")]
    InvalidHandle(String),
    #[error("Invalid variable label: {0:?}")]
    InvalidVariableLabel(String),
    #[error("Too many variables in assignment (> {0})")]
    TooManyVariables(usize),
}
