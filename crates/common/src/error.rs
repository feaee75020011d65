//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Platform error: {0}")]
    Platform(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for protocol::HidError {
    fn from(err: Error) -> Self {
        protocol::HidError::Unavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
