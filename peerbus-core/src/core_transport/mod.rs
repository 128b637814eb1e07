/*
    Transport - the messaging substrate the manager drives

    Responsibilities:
    - Listening and peering with remote endpoints
    - Registering topic prefixes, for local delivery or for relaying only
    - Publishing data on a topic, to all interested peers or to one peer
    - Queueing inbound messages, peer status changes and errors until the
      manager polls them

    The manager never blocks on the transport. Connection attempts complete
    asynchronously and are reported as Status items on the inbound queue.

    Implementations:
    - mesh: in-process network of endpoints, used by single process
      deployments and by the test suite
*/

pub mod mesh;

pub use mesh::{MeshEndpoint, MeshNetwork};

use crate::core_wire::{Data, Topic};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Stable identity of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Connecting,
    Connected,
    Retrying,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerStatus::Connecting => "connecting",
            PeerStatus::Connected => "connected",
            PeerStatus::Retrying => "retrying",
        };
        f.write_str(s)
    }
}

/// A remote endpoint as known to this node
#[derive(Debug, Clone, PartialEq)]
pub struct PeerInfo {
    /// Unknown until the connection is established
    pub node: Option<NodeId>,
    pub address: String,
    pub port: u16,
    pub status: PeerStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    PeerAdded(PeerInfo),
    PeerRemoved(PeerInfo),
    PeerLost(PeerInfo),
    PeerUnavailable {
        address: String,
        port: u16,
        reason: String,
    },
}

/// One item of the transport's inbound queue
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message { topic: Topic, data: Data },
    Status(Status),
    Error(TransportError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("port {0} is already in use")]
    AddressInUse(u16),

    #[error("no ephemeral ports left")]
    PortsExhausted,

    #[error("not peered with {address}:{port}")]
    UnknownPeer { address: String, port: u16 },

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("transport is shut down")]
    Shutdown,

    #[error("transport state unavailable: {0}")]
    Internal(String),
}

pub type TransportResult<T> = Result<T, TransportError>;

pub trait Transport {
    fn node_id(&self) -> NodeId;

    /// Returns the bound port; port 0 asks for an ephemeral one
    fn listen(&mut self, address: &str, port: u16) -> TransportResult<u16>;

    /// Start connecting. The outcome is reported as a status item.
    fn peer(&mut self, address: &str, port: u16) -> TransportResult<()>;

    fn unpeer(&mut self, address: &str, port: u16) -> TransportResult<()>;

    fn peers(&self) -> Vec<PeerInfo>;

    /// Register a prefix for local delivery
    fn subscribe(&mut self, prefix: &str) -> TransportResult<()>;

    /// Register a prefix for relaying only
    fn forward(&mut self, prefix: &str) -> TransportResult<()>;

    /// Drop both registrations of a prefix
    fn unsubscribe(&mut self, prefix: &str) -> TransportResult<()>;

    fn publish(&mut self, topic: &Topic, data: Data) -> TransportResult<()>;

    fn publish_to(&mut self, peer: &NodeId, topic: &Topic, data: Data) -> TransportResult<()>;

    /// Next queued inbound item, never blocks
    fn try_next(&mut self) -> Option<Inbound>;

    fn is_shutdown(&self) -> bool;

    fn shutdown(&mut self);
}
