/*
    errors.rs - Error types for the data store subsystem

    Covers:
    - Store registration (duplicate names, closed handles)
    - Backend storage failures
    - Replication protocol decoding
    - Forwarded host table bindings
*/

use crate::core_transport::TransportError;
use crate::core_wire::CodecError;
use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Error)]
pub enum StoreError {
    /// A store with this name is already registered
    #[error("Store already exists: {0}")]
    AlreadyExists(String),

    /// No store with this name
    #[error("No such store: {0}")]
    NotFound(String),

    /// The handle refers to a store that was closed
    #[error("Store handle is no longer valid: {0}")]
    Closed(String),

    /// The operation needs the other store role
    #[error("Invalid operation on store {store}: {reason}")]
    InvalidOperation { store: String, reason: String },

    /// A host table is already bound to this store name
    #[error("Store {0} is already forwarded to a table")]
    AlreadyForwarded(String),

    /// No host table is bound to this store name
    #[error("Store {0} is not forwarded to a table")]
    NotForwarded(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing or subscribing failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Arithmetic on a value of the wrong type
    #[error("Type error: {0}")]
    Type(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<CodecError> for StoreError {
    fn from(err: CodecError) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<TransportError> for StoreError {
    fn from(err: TransportError) -> Self {
        StoreError::Transport(err.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}
