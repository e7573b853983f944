use crate::sources::SourceId;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum BroadcastError {
    #[error("Source already registered: {0}")]
    DuplicateSource(SourceId),

    #[error("Unknown source: {0}")]
    UnknownSource(SourceId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BroadcastError>;
