//! Peering lifecycle and transport status handling
//!
//! `peer()` only records the request and hands it to the transport. The
//! outcome arrives later as a status item, which updates the peering, is
//! raised as a `Comm::*` host event and may schedule a retry.

use super::errors::ManagerResult;
use super::manager::Manager;
use crate::core_host::{Host, RecordField, Type, Val};
use crate::core_transport::{NodeId, PeerInfo, PeerStatus, Status, Transport, TransportError};
use crate::core_wire::Protocol;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const PEER_ADDED_EVENT: &str = "Comm::peer_added";
pub const PEER_REMOVED_EVENT: &str = "Comm::peer_removed";
pub const PEER_LOST_EVENT: &str = "Comm::peer_lost";
pub const ERROR_EVENT: &str = "Comm::error";
pub const ERROR_CODE_ENUM: &str = "Comm::ErrorCode";

/// Record type of the first argument of the peer status events:
/// `[id: string &optional, address: string, port: port]`
pub fn endpoint_info_type() -> Type {
    Type::Record(vec![
        RecordField::optional("id", Type::String),
        RecordField::new("address", Type::String),
        RecordField::new("port", Type::Port),
    ])
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Peering {
    /// `None` gives up after the first failure
    pub(super) retry: Option<Duration>,
    pub(super) status: PeerStatus,
    pub(super) next_attempt: Option<f64>,
    pub(super) node: Option<NodeId>,
}

fn endpoint_val(info: &PeerInfo) -> Val {
    Val::Record(vec![
        info.node.map(|n| Val::String(n.to_string())),
        Some(Val::String(info.address.clone())),
        Some(Val::Port(info.port, Protocol::Tcp)),
    ])
}

fn error_code(err: &TransportError) -> &'static str {
    match err {
        TransportError::AddressInUse(_) => "ADDRESS_IN_USE",
        TransportError::PortsExhausted => "PORTS_EXHAUSTED",
        TransportError::UnknownPeer { .. } | TransportError::UnknownNode(_) => "PEER_INVALID",
        TransportError::Shutdown => "SHUTDOWN",
        TransportError::Internal(_) => "UNSPECIFIED",
    }
}

impl<T: Transport, H: Host> Manager<T, H> {
    /// Accept peerings on `port`, or on an ephemeral port when it is 0.
    /// Returns the bound port.
    pub fn listen(&mut self, address: &str, port: u16) -> ManagerResult<u16> {
        let bound = self.transport.listen(address, port).map_err(|e| {
            warn!(address, port, error = %e, "failed to listen");
            e
        })?;
        self.bound_port = Some(bound);
        info!(address, port = bound, "listening for peers");
        Ok(bound)
    }

    /// Ask for a peering with a remote endpoint. The connection is set up
    /// asynchronously; failures and losses are retried every `retry` until
    /// `unpeer`, unless `retry` is zero. A configured connect retry override
    /// replaces `retry`.
    pub fn peer(&mut self, address: &str, port: u16, retry: Duration) -> ManagerResult<()> {
        let retry = self.config.peering.connect_retry_override.unwrap_or(retry);
        let retry = (!retry.is_zero()).then_some(retry);
        let key = (address.to_string(), port);

        if let Some(existing) = self.peerings.get_mut(&key) {
            if existing.status == PeerStatus::Connected {
                existing.retry = retry;
                debug!(address, port, "already peered");
                return Ok(());
            }
        }

        self.peerings.insert(
            key.clone(),
            Peering {
                retry,
                status: PeerStatus::Connecting,
                next_attempt: None,
                node: None,
            },
        );
        debug!(address, port, ?retry, "starting to peer");
        if let Err(e) = self.transport.peer(address, port) {
            self.peerings.remove(&key);
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop a peering, or cancel its pending retries
    pub fn unpeer(&mut self, address: &str, port: u16) -> ManagerResult<()> {
        match self.peerings.remove(&(address.to_string(), port)) {
            Some(peering) if peering.status != PeerStatus::Connected => {
                debug!(address, port, "cancelled pending peering");
                Ok(())
            }
            _ => {
                self.transport.unpeer(address, port)?;
                Ok(())
            }
        }
    }

    /// Connected peers as reported by the transport, plus requested
    /// peerings that are still being set up or retried
    pub fn peers(&self) -> Vec<PeerInfo> {
        let mut peers = self.transport.peers();
        for ((address, port), peering) in &self.peerings {
            if peering.status != PeerStatus::Connected {
                peers.push(PeerInfo {
                    node: peering.node,
                    address: address.clone(),
                    port: *port,
                    status: peering.status,
                });
            }
        }
        peers
    }

    pub(super) fn handle_status(&mut self, status: Status) {
        let now = self.now();
        match status {
            Status::PeerAdded(info) => {
                self.peer_count += 1;
                if let Some(peering) = self.peerings.get_mut(&(info.address.clone(), info.port)) {
                    peering.status = PeerStatus::Connected;
                    peering.node = info.node;
                    peering.next_attempt = None;
                }
                info!(peer = ?info.node, address = %info.address, port = info.port, "peer added");
                self.stores.on_peer_added(now);
                self.raise_status(PEER_ADDED_EVENT, &info, "handshake successful");
            }
            Status::PeerRemoved(info) => {
                self.peer_count = self.peer_count.saturating_sub(1);
                info!(peer = ?info.node, address = %info.address, port = info.port, "peer removed");
                if let Some(node) = &info.node {
                    self.stores.on_peer_lost(node, now);
                }
                self.raise_status(PEER_REMOVED_EVENT, &info, "removed peering");
            }
            Status::PeerLost(info) => {
                self.peer_count = self.peer_count.saturating_sub(1);
                let retrying = self.schedule_retry(&info.address, info.port, now);
                info!(peer = ?info.node, address = %info.address, port = info.port, retrying, "lost peer");
                if let Some(node) = &info.node {
                    self.stores.on_peer_lost(node, now);
                }
                self.raise_status(PEER_LOST_EVENT, &info, "lost connection to remote peer");
            }
            Status::PeerUnavailable {
                address,
                port,
                reason,
            } => {
                let retrying = self.schedule_retry(&address, port, now);
                warn!(%address, port, %reason, retrying, "peer unavailable");
                self.raise_error(
                    "PEER_UNAVAILABLE",
                    format!("unable to connect to {}:{}: {}", address, port, reason),
                );
            }
        }
    }

    pub(super) fn handle_transport_error(&mut self, err: TransportError) {
        warn!(error = %err, "transport reported an error");
        self.raise_error(error_code(&err), err.to_string());
    }

    /// Returns whether the peering will be retried
    fn schedule_retry(&mut self, address: &str, port: u16, now: f64) -> bool {
        let key = (address.to_string(), port);
        let Some(retry) = self.peerings.get(&key).map(|p| p.retry) else {
            return false;
        };
        match (retry, self.peerings.get_mut(&key)) {
            (Some(interval), Some(peering)) => {
                peering.status = PeerStatus::Retrying;
                peering.next_attempt = Some(now + interval.as_secs_f64());
                true
            }
            _ => {
                self.peerings.remove(&key);
                false
            }
        }
    }

    pub(super) fn retry_peerings(&mut self, now: f64) {
        let due: Vec<(String, u16)> = self
            .peerings
            .iter()
            .filter(|(_, p)| {
                p.status == PeerStatus::Retrying && p.next_attempt.is_some_and(|t| t <= now)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for (address, port) in due {
            debug!(%address, port, "retrying peering");
            if let Some(peering) = self.peerings.get_mut(&(address.clone(), port)) {
                peering.status = PeerStatus::Connecting;
                peering.next_attempt = None;
            }
            if let Err(e) = self.transport.peer(&address, port) {
                warn!(%address, port, error = %e, "peering retry failed");
                self.schedule_retry(&address, port, now);
            }
        }
    }

    fn raise_status(&mut self, event: &str, info: &PeerInfo, message: &str) {
        if self.host.lookup_event(event).is_none() {
            return;
        }
        self.host
            .raise_event(event, vec![endpoint_val(info), Val::String(message.to_string())]);
    }

    fn raise_error(&mut self, code: &str, message: String) {
        if self.host.lookup_event(ERROR_EVENT).is_none() {
            return;
        }
        let code = Val::Enum {
            type_name: ERROR_CODE_ENUM.to_string(),
            name: code.to_string(),
        };
        self.host
            .raise_event(ERROR_EVENT, vec![code, Val::String(message)]);
    }
}
