use thiserror::Error;

pub type ChurnResult<T> = Result<T, ChurnError>;

#[derive(Error, Debug)]
pub enum ChurnError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Record validation error: {0}")]
    Validation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
