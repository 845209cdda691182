//! Error types for the data layer

use crate::model::StoreId;
use thiserror::Error;

/// Result type alias for data layer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in data layer operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unknown store: {0}")]
    UnknownStore(StoreId),

    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Key not found: {}", hex::encode(.0))]
    KeyNotFound(Vec<u8>),

    #[error("Key already exists: {}", hex::encode(.0))]
    KeyExists(Vec<u8>),

    #[error("Malformed change: {0}")]
    MalformedChange(String),

    #[error("Change {index} failed: {source}")]
    ChangeFailed {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Store {store_id} has no generation {generation}")]
    UnknownGeneration { store_id: StoreId, generation: u64 },

    #[error("Storage corruption: {0}")]
    StorageCorruption(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// The innermost error, looking through [`Error::ChangeFailed`]
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::ChangeFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
