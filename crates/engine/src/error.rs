use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
