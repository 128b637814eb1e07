/*
    Manager - the node's single entry point for inter-process communication

    Responsibilities:
    - Lifecycle: post-configuration setup, init-done marker, graceful
      termination
    - Owning the transport, the store registry, the pending query tracker,
      the log buffers and the statistics
    - The poll entry point: drain the inbound queue, hand out store answers,
      run timers

    Everything here runs on the thread that calls `process()`. The transport
    queue is the only state shared with other threads.

    The API is split by concern:
        peering.rs   listen / peer / unpeer, transport status handling
        publish.rs   publishing, subscriptions, auto-publish, event records
        stores.rs    data store management and queries
        dispatch.rs  inbound message routing
*/

use super::clock::Clock;
use super::errors::ManagerResult;
use super::peering::Peering;
use crate::config::Config;
use crate::core_host::Host;
use crate::core_logbuf::LogBuffers;
use crate::core_store::{PendingQueries, StoreRegistry};
use crate::core_transport::{Inbound, NodeId, PeerStatus, Transport};
use crate::metrics::{Stats, StatsCollector};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, trace};

/// Maps (stream, path) to the topic a log stream is published on
pub type LogTopicFn = Box<dyn Fn(&str, &str) -> String>;

pub struct Manager<T: Transport, H: Host> {
    pub(super) transport: T,
    pub(super) host: H,
    pub(super) config: Config,
    pub(super) clock: Clock,
    pub(super) stats: StatsCollector,

    /// Local-delivery prefixes
    pub(super) subscriptions: BTreeSet<String>,
    /// Forward-only prefixes
    pub(super) forwards: BTreeSet<String>,
    /// event name -> topics it is mirrored on
    pub(super) auto_publish: BTreeMap<String, BTreeSet<String>>,

    pub(super) log_buffers: LogBuffers,
    pub(super) log_topic_fn: Option<LogTopicFn>,

    pub(super) stores: StoreRegistry,
    pub(super) pending: PendingQueries,

    /// Outbound peerings requested through `peer()`, by (address, port)
    pub(super) peerings: BTreeMap<(String, u16), Peering>,
    pub(super) bound_port: Option<u16>,
    pub(super) peer_count: usize,

    pub(super) initialized: bool,
    pub(super) after_init: bool,
}

impl<T: Transport, H: Host> Manager<T, H> {
    /// Build a manager; the clock follows `config.manager.use_real_time`
    pub fn new(config: &Config, transport: T, host: H) -> Self {
        let clock = if config.manager.use_real_time {
            Clock::Real
        } else {
            Clock::simulated()
        };
        Self::with_clock(config, clock, transport, host)
    }

    pub fn with_clock(config: &Config, clock: Clock, transport: T, host: H) -> Self {
        let stores = StoreRegistry::new(transport.node_id(), config.stores.sqlite_dir.clone());
        let log_buffers = LogBuffers::new(
            config.log_buffer.batch_size,
            config.log_buffer.max_buffered_records,
        );
        Self {
            transport,
            host,
            config: config.clone(),
            clock,
            stats: StatsCollector::new(),
            subscriptions: BTreeSet::new(),
            forwards: BTreeSet::new(),
            auto_publish: BTreeMap::new(),
            log_buffers,
            log_topic_fn: None,
            stores,
            pending: PendingQueries::new(),
            peerings: BTreeMap::new(),
            bound_port: None,
            peer_count: 0,
            initialized: false,
            after_init: false,
        }
    }

    /// One-time setup once the host has loaded its configuration
    pub fn init_post_script(&mut self) {
        if self.initialized {
            return;
        }
        self.initialized = true;
        crate::metrics::init_metrics();
        info!(
            node = %self.node_id(),
            simulated_time = self.clock.is_simulated(),
            log_batch_size = self.log_buffers.batch_size(),
            "manager initialized"
        );
    }

    /// From now on auto-published events are mirrored to their topics
    pub fn init_done(&mut self) {
        self.after_init = true;
    }

    /// Flush logs, cancel queries, close stores, drop peerings and shut the
    /// transport down. Later calls do nothing.
    pub fn terminate(&mut self) {
        if self.transport.is_shutdown() {
            return;
        }
        let flushed = self.flush_log_buffers();
        let cancelled = self.pending.cancel_all();
        let closed = self.stores.clear(&mut self.transport);

        let peerings = std::mem::take(&mut self.peerings);
        for ((address, port), peering) in peerings {
            if peering.status != PeerStatus::Connected {
                continue;
            }
            if let Err(e) = self.transport.unpeer(&address, port) {
                debug!(%address, port, error = %e, "unpeer during shutdown failed");
            }
        }

        self.transport.shutdown();
        self.peer_count = 0;
        info!(
            flushed,
            cancelled,
            stores = closed.len(),
            "manager terminated"
        );
    }

    /// Listening or connected to at least one peer
    pub fn active(&self) -> bool {
        !self.transport.is_shutdown() && (self.bound_port.is_some() || self.peer_count > 0)
    }

    pub fn node_id(&self) -> NodeId {
        self.transport.node_id()
    }

    pub fn stats(&self) -> Stats {
        self.stats
            .snapshot(self.peer_count, self.stores.len(), self.pending.len())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Drain everything the transport has queued, deliver store answers and
    /// run timers. Never blocks.
    pub fn process(&mut self) {
        let mut drained = 0usize;
        while let Some(item) = self.transport.try_next() {
            drained += 1;
            match item {
                Inbound::Message { topic, data } => self.dispatch_message(&topic, data),
                Inbound::Status(status) => self.handle_status(status),
                Inbound::Error(err) => self.handle_transport_error(err),
            }
        }
        if drained > 0 {
            trace!(drained, "drained inbound queue");
        }

        self.deliver_store_responses();
        self.run_timers();
    }

    /// The manager has no deadline of its own; it only does work when polled
    pub fn next_timeout(&self) -> Option<Duration> {
        None
    }

    /// Move simulated time to `to` (seconds) and run the timers due by then
    pub fn advance_time(&mut self, to: f64) -> ManagerResult<()> {
        self.clock.advance_to(to)?;
        self.run_timers();
        Ok(())
    }

    pub(super) fn deliver_store_responses(&mut self) {
        for response in self.stores.take_responses() {
            self.pending
                .complete(response.handle.key(), response.request_id, response.outcome);
        }
    }

    pub(super) fn run_timers(&mut self) {
        let now = self.now();
        self.retry_peerings(now);
        self.stores.run_timers(&mut self.transport, now);
        self.flush_pending_queries();
    }
}

impl<T: Transport, H: Host> Drop for Manager<T, H> {
    fn drop(&mut self) {
        // Callbacks must not outlive their manager
        self.pending.cancel_all();
    }
}
