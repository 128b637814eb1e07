//! Statistics collector

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time statistics of a manager
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub num_peers: usize,
    pub num_stores: usize,
    pub num_pending_queries: usize,
    pub num_events_incoming: u64,
    pub num_events_outgoing: u64,
    pub num_logs_incoming: u64,
    pub num_logs_outgoing: u64,
    pub num_logs_dropped: u64,
    pub num_ids_incoming: u64,
    pub num_ids_outgoing: u64,
}

#[derive(Debug, Default)]
pub struct StatsCollector {
    events_incoming: AtomicU64,
    events_outgoing: AtomicU64,
    logs_incoming: AtomicU64,
    logs_outgoing: AtomicU64,
    logs_dropped: AtomicU64,
    ids_incoming: AtomicU64,
    ids_outgoing: AtomicU64,
}

fn bump(counter: &AtomicU64, name: &'static str, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
    ::metrics::counter!(name).increment(n);
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_events_incoming(&self) {
        bump(&self.events_incoming, super::EVENTS_IN, 1);
    }

    pub fn inc_events_outgoing(&self) {
        bump(&self.events_outgoing, super::EVENTS_OUT, 1);
    }

    pub fn inc_logs_incoming(&self) {
        bump(&self.logs_incoming, super::LOGS_IN, 1);
    }

    pub fn add_logs_outgoing(&self, n: u64) {
        bump(&self.logs_outgoing, super::LOGS_OUT, n);
    }

    pub fn inc_logs_dropped(&self) {
        bump(&self.logs_dropped, super::LOGS_DROPPED, 1);
    }

    pub fn inc_ids_incoming(&self) {
        bump(&self.ids_incoming, super::IDS_IN, 1);
    }

    pub fn inc_ids_outgoing(&self) {
        bump(&self.ids_outgoing, super::IDS_OUT, 1);
    }

    /// Report gauges and build a snapshot around them
    pub fn snapshot(&self, peers: usize, stores: usize, pending_queries: usize) -> Stats {
        ::metrics::gauge!(super::PEERS).set(peers as f64);
        ::metrics::gauge!(super::STORES).set(stores as f64);
        ::metrics::gauge!(super::PENDING_QUERIES).set(pending_queries as f64);

        Stats {
            num_peers: peers,
            num_stores: stores,
            num_pending_queries: pending_queries,
            num_events_incoming: self.events_incoming.load(Ordering::Relaxed),
            num_events_outgoing: self.events_outgoing.load(Ordering::Relaxed),
            num_logs_incoming: self.logs_incoming.load(Ordering::Relaxed),
            num_logs_outgoing: self.logs_outgoing.load(Ordering::Relaxed),
            num_logs_dropped: self.logs_dropped.load(Ordering::Relaxed),
            num_ids_incoming: self.ids_incoming.load(Ordering::Relaxed),
            num_ids_outgoing: self.ids_outgoing.load(Ordering::Relaxed),
        }
    }
}
