use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Command {name} has an empty program at position {index}")]
    EmptyStep { name: String, index: usize },

    #[error("Command name must not be empty")]
    EmptyCommandName,

    #[error("Invalid backoff: initial {initial:?} must be non-zero and not exceed maximum {maximum:?}")]
    InvalidBackoff {
        initial: std::time::Duration,
        maximum: std::time::Duration,
    },

    #[error("Invalid job payload: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
