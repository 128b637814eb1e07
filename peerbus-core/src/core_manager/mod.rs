//! The manager facade
//!
//! [`Manager`] glues a [`Transport`](crate::core_transport::Transport) to a
//! [`Host`](crate::core_host::Host): it publishes and receives events, log
//! streams and identifier updates, manages peerings and owns the data
//! stores. It is driven entirely by `process()`.

pub mod clock;
mod dispatch;
pub mod errors;
pub mod manager;
mod peering;
mod publish;
mod stores;

pub use clock::Clock;
pub use errors::{ManagerError, ManagerResult};
pub use manager::{LogTopicFn, Manager};
pub use peering::{
    endpoint_info_type, ERROR_CODE_ENUM, ERROR_EVENT, PEER_ADDED_EVENT, PEER_LOST_EVENT,
    PEER_REMOVED_EVENT,
};
pub use publish::EventRecord;
