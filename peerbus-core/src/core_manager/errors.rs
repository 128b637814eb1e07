/*
    errors.rs - Error types for the manager facade

    Covers:
    - Lifecycle (shut down transport, clock mode misuse)
    - Publish validation (unknown identifiers and events, unnamed records)
    - Errors bubbling up from the wire codec, transport, stores, query
      tracker and log buffers
*/

use crate::core_logbuf::LogBufferError;
use crate::core_store::{QueryError, StoreError};
use crate::core_transport::TransportError;
use crate::core_wire::CodecError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    /// The transport has been shut down
    #[error("manager is shut down")]
    Shutdown,

    /// The host has no identifier with this name
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    /// The identifier exists but holds no value
    #[error("identifier has no value: {0}")]
    UnsetIdentifier(String),

    /// The event record failed validation and must not be published
    #[error("event record has no name")]
    UnnamedEvent,

    /// `advance_time` on a manager driven by the wall clock
    #[error("cannot advance time of a real-time clock")]
    RealTimeClock,

    /// Simulated time only moves forward
    #[error("time cannot move backwards from {now} to {requested}")]
    TimeWentBackwards { now: f64, requested: f64 },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    LogBuffer(#[from] LogBufferError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;
