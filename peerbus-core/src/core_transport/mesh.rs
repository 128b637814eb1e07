//! MeshNetwork - in-process transport
//!
//! A shared broker routes published data between `MeshEndpoint`s that have
//! peered with each other. Each endpoint owns an unbounded inbound queue;
//! publishing pushes into the queues of interested peers and returns
//! immediately.
//!
//! Routing follows prefix registrations: a peer receives a message if one of
//! its subscribe or forward prefixes matches the topic, and peers holding a
//! matching forward prefix relay it further. A message never returns to its
//! publisher and is delivered at most once per endpoint.

use super::{
    Inbound, NodeId, PeerInfo, PeerStatus, Status, Transport, TransportError, TransportResult,
};
use crate::core_wire::{Data, Topic};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

const EPHEMERAL_PORT_START: u16 = 49152;

#[derive(Debug, Clone)]
struct Link {
    /// Address and port this side dialed, empty for the accepting side
    address: String,
    port: u16,
}

#[derive(Debug)]
struct EndpointState {
    inbox: mpsc::UnboundedSender<Inbound>,
    subscriptions: BTreeSet<String>,
    forwards: BTreeSet<String>,
    links: HashMap<NodeId, Link>,
    ports: Vec<u16>,
    shutdown: bool,
}

impl EndpointState {
    fn push(&self, item: Inbound) {
        // The receiver is gone once its endpoint is dropped
        let _ = self.inbox.send(item);
    }

    fn wants(&self, topic: &Topic) -> (bool, bool) {
        let local = self.subscriptions.iter().any(|p| topic.matches(p));
        let relay = self.forwards.iter().any(|p| topic.matches(p));
        (local, relay)
    }
}

#[derive(Debug, Default)]
struct MeshState {
    endpoints: HashMap<NodeId, EndpointState>,
    listeners: HashMap<u16, NodeId>,
    next_ephemeral: u16,
}

impl MeshState {
    fn allocate_port(&mut self) -> TransportResult<u16> {
        if self.next_ephemeral < EPHEMERAL_PORT_START {
            self.next_ephemeral = EPHEMERAL_PORT_START;
        }
        for _ in 0..=(u16::MAX - EPHEMERAL_PORT_START) {
            let port = self.next_ephemeral;
            self.next_ephemeral = if port == u16::MAX {
                EPHEMERAL_PORT_START
            } else {
                port + 1
            };
            if !self.listeners.contains_key(&port) {
                return Ok(port);
            }
        }
        Err(TransportError::PortsExhausted)
    }

    fn info(&self, node: &NodeId, link: &Link) -> PeerInfo {
        PeerInfo {
            node: Some(*node),
            address: link.address.clone(),
            port: link.port,
            status: PeerStatus::Connected,
        }
    }

    /// Remove the link between `a` and `b`, returning each side's view of it
    fn unlink(&mut self, a: &NodeId, b: &NodeId) -> Option<(PeerInfo, PeerInfo)> {
        let a_link = self.endpoints.get_mut(a)?.links.remove(b)?;
        let b_link = self
            .endpoints
            .get_mut(b)
            .and_then(|s| s.links.remove(a))
            .unwrap_or(Link {
                address: String::new(),
                port: 0,
            });
        Some((self.info(b, &a_link), self.info(a, &b_link)))
    }

    fn route(&self, from: &NodeId, only: Option<&NodeId>, topic: &Topic, data: &Data) -> usize {
        let mut visited: HashSet<NodeId> = HashSet::from([*from]);
        let mut frontier = vec![*from];
        let mut delivered = 0;

        while let Some(node) = frontier.pop() {
            let Some(state) = self.endpoints.get(&node) else {
                continue;
            };
            for peer_id in state.links.keys() {
                if visited.contains(peer_id) {
                    continue;
                }
                if node == *from && only.is_some_and(|target| target != peer_id) {
                    continue;
                }
                let Some(peer) = self.endpoints.get(peer_id) else {
                    continue;
                };
                let (local, relay) = peer.wants(topic);
                if !local && !relay {
                    continue;
                }
                visited.insert(*peer_id);
                peer.push(Inbound::Message {
                    topic: topic.clone(),
                    data: data.clone(),
                });
                delivered += 1;
                if relay {
                    frontier.push(*peer_id);
                }
            }
        }
        delivered
    }
}

/// Shared in-process network, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct MeshNetwork {
    state: Arc<Mutex<MeshState>>,
}

impl MeshNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new endpoint attached to this network
    pub fn endpoint(&self) -> MeshEndpoint {
        let node = NodeId::random();
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut state) = self.lock() {
            state.endpoints.insert(
                node,
                EndpointState {
                    inbox: tx,
                    subscriptions: BTreeSet::new(),
                    forwards: BTreeSet::new(),
                    links: HashMap::new(),
                    ports: Vec::new(),
                    shutdown: false,
                },
            );
        }
        MeshEndpoint {
            network: self.clone(),
            node,
            inbox: rx,
            shutdown: false,
        }
    }

    /// Break the link between two endpoints as if the connection dropped.
    /// Both sides observe `PeerLost`.
    pub fn sever(&self, a: &NodeId, b: &NodeId) -> bool {
        let Ok(mut state) = self.lock() else {
            return false;
        };
        let Some((a_view, b_view)) = state.unlink(a, b) else {
            return false;
        };
        debug!(%a, %b, "mesh link severed");
        if let Some(s) = state.endpoints.get(a) {
            s.push(Inbound::Status(Status::PeerLost(a_view)));
        }
        if let Some(s) = state.endpoints.get(b) {
            s.push(Inbound::Status(Status::PeerLost(b_view)));
        }
        true
    }

    pub fn is_linked(&self, a: &NodeId, b: &NodeId) -> bool {
        self.lock()
            .map(|s| s.endpoints.get(a).is_some_and(|e| e.links.contains_key(b)))
            .unwrap_or(false)
    }

    fn lock(&self) -> TransportResult<MutexGuard<'_, MeshState>> {
        self.state
            .lock()
            .map_err(|e| TransportError::Internal(format!("mesh lock poisoned: {}", e)))
    }
}

/// One node's attachment to a [`MeshNetwork`]
#[derive(Debug)]
pub struct MeshEndpoint {
    network: MeshNetwork,
    node: NodeId,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    shutdown: bool,
}

impl MeshEndpoint {
    pub fn network(&self) -> &MeshNetwork {
        &self.network
    }

    fn with_self<R>(
        &self,
        f: impl FnOnce(&mut EndpointState) -> R,
    ) -> TransportResult<R> {
        if self.shutdown {
            return Err(TransportError::Shutdown);
        }
        let mut state = self.network.lock()?;
        let endpoint = state
            .endpoints
            .get_mut(&self.node)
            .ok_or(TransportError::UnknownNode(self.node))?;
        Ok(f(endpoint))
    }
}

impl Transport for MeshEndpoint {
    fn node_id(&self) -> NodeId {
        self.node
    }

    fn listen(&mut self, _address: &str, port: u16) -> TransportResult<u16> {
        if self.shutdown {
            return Err(TransportError::Shutdown);
        }
        let mut state = self.network.lock()?;
        let port = if port == 0 {
            state.allocate_port()?
        } else if state.listeners.contains_key(&port) {
            return Err(TransportError::AddressInUse(port));
        } else {
            port
        };
        state.listeners.insert(port, self.node);
        if let Some(endpoint) = state.endpoints.get_mut(&self.node) {
            endpoint.ports.push(port);
        }
        debug!(node = %self.node, port, "mesh endpoint listening");
        Ok(port)
    }

    fn peer(&mut self, address: &str, port: u16) -> TransportResult<()> {
        if self.shutdown {
            return Err(TransportError::Shutdown);
        }
        let mut state = self.network.lock()?;
        let me = self.node;

        let remote = state
            .listeners
            .get(&port)
            .copied()
            .filter(|id| *id != me)
            .filter(|id| state.endpoints.get(id).is_some_and(|e| !e.shutdown));

        let Some(remote) = remote else {
            if let Some(endpoint) = state.endpoints.get(&me) {
                endpoint.push(Inbound::Status(Status::PeerUnavailable {
                    address: address.to_string(),
                    port,
                    reason: "connection refused".to_string(),
                }));
            }
            return Ok(());
        };

        let already = state
            .endpoints
            .get(&me)
            .is_some_and(|e| e.links.contains_key(&remote));
        if already {
            trace!(node = %me, %remote, "already peered");
            return Ok(());
        }

        let dialer_link = Link {
            address: address.to_string(),
            port,
        };
        let acceptor_link = Link {
            address: String::new(),
            port: 0,
        };
        let dialer_view = state.info(&remote, &dialer_link);
        let acceptor_view = state.info(&me, &acceptor_link);

        if let Some(endpoint) = state.endpoints.get_mut(&me) {
            endpoint.links.insert(remote, dialer_link);
            endpoint.push(Inbound::Status(Status::PeerAdded(dialer_view)));
        }
        if let Some(endpoint) = state.endpoints.get_mut(&remote) {
            endpoint.links.insert(me, acceptor_link);
            endpoint.push(Inbound::Status(Status::PeerAdded(acceptor_view)));
        }
        debug!(node = %me, %remote, port, "mesh peering established");
        Ok(())
    }

    fn unpeer(&mut self, address: &str, port: u16) -> TransportResult<()> {
        if self.shutdown {
            return Err(TransportError::Shutdown);
        }
        let mut state = self.network.lock()?;
        let me = self.node;
        let remote = state.endpoints.get(&me).and_then(|e| {
            e.links
                .iter()
                .find(|(_, link)| link.address == address && link.port == port)
                .map(|(id, _)| *id)
        });

        match remote.and_then(|r| state.unlink(&me, &r).map(|views| (r, views))) {
            Some((remote, (my_view, their_view))) => {
                if let Some(endpoint) = state.endpoints.get(&me) {
                    endpoint.push(Inbound::Status(Status::PeerRemoved(my_view)));
                }
                if let Some(endpoint) = state.endpoints.get(&remote) {
                    endpoint.push(Inbound::Status(Status::PeerLost(their_view)));
                }
            }
            None => {
                if let Some(endpoint) = state.endpoints.get(&me) {
                    endpoint.push(Inbound::Error(TransportError::UnknownPeer {
                        address: address.to_string(),
                        port,
                    }));
                }
            }
        }
        Ok(())
    }

    fn peers(&self) -> Vec<PeerInfo> {
        let Ok(state) = self.network.lock() else {
            return Vec::new();
        };
        let Some(endpoint) = state.endpoints.get(&self.node) else {
            return Vec::new();
        };
        let mut peers: Vec<PeerInfo> = endpoint
            .links
            .iter()
            .map(|(id, link)| state.info(id, link))
            .collect();
        peers.sort_by_key(|p| (p.port, p.node));
        peers
    }

    fn subscribe(&mut self, prefix: &str) -> TransportResult<()> {
        self.with_self(|e| {
            e.subscriptions.insert(prefix.to_string());
        })
    }

    fn forward(&mut self, prefix: &str) -> TransportResult<()> {
        self.with_self(|e| {
            e.forwards.insert(prefix.to_string());
        })
    }

    fn unsubscribe(&mut self, prefix: &str) -> TransportResult<()> {
        self.with_self(|e| {
            e.subscriptions.remove(prefix);
            e.forwards.remove(prefix);
        })
    }

    fn publish(&mut self, topic: &Topic, data: Data) -> TransportResult<()> {
        if self.shutdown {
            return Err(TransportError::Shutdown);
        }
        let state = self.network.lock()?;
        let delivered = state.route(&self.node, None, topic, &data);
        trace!(node = %self.node, %topic, delivered, "published");
        Ok(())
    }

    fn publish_to(&mut self, peer: &NodeId, topic: &Topic, data: Data) -> TransportResult<()> {
        if self.shutdown {
            return Err(TransportError::Shutdown);
        }
        let state = self.network.lock()?;
        let linked = state
            .endpoints
            .get(&self.node)
            .is_some_and(|e| e.links.contains_key(peer));
        if !linked {
            return Err(TransportError::UnknownNode(*peer));
        }
        state.route(&self.node, Some(peer), topic, &data);
        Ok(())
    }

    fn try_next(&mut self) -> Option<Inbound> {
        self.inbox.try_recv().ok()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    fn shutdown(&mut self) {
        if self.shutdown {
            return;
        }
        self.shutdown = true;

        let Ok(mut state) = self.network.lock() else {
            return;
        };
        let me = self.node;
        state.listeners.retain(|_, id| *id != me);
        let remotes: Vec<NodeId> = state
            .endpoints
            .get(&me)
            .map(|e| e.links.keys().copied().collect())
            .unwrap_or_default();
        for remote in remotes {
            if let Some((_, their_view)) = state.unlink(&me, &remote) {
                if let Some(endpoint) = state.endpoints.get(&remote) {
                    endpoint.push(Inbound::Status(Status::PeerLost(their_view)));
                }
            }
        }
        if let Some(endpoint) = state.endpoints.get_mut(&me) {
            endpoint.shutdown = true;
            endpoint.subscriptions.clear();
            endpoint.forwards.clear();
        }
        debug!(node = %me, "mesh endpoint shut down");
    }
}

impl Drop for MeshEndpoint {
    fn drop(&mut self) {
        self.shutdown();
        if let Ok(mut state) = self.network.lock() {
            state.endpoints.remove(&self.node);
        }
    }
}
