//! Statistics and `metrics` facade integration
//!
//! The manager keeps its own counters so `Manager::stats()` works without
//! an installed recorder; every increment is also reported to the facade.

use ::metrics::{describe_counter, describe_gauge};

mod collector;

pub use collector::{Stats, StatsCollector};

pub const EVENTS_IN: &str = "peerbus.events.incoming";
pub const EVENTS_OUT: &str = "peerbus.events.outgoing";
pub const LOGS_IN: &str = "peerbus.logs.incoming";
pub const LOGS_OUT: &str = "peerbus.logs.outgoing";
pub const LOGS_DROPPED: &str = "peerbus.logs.dropped";
pub const IDS_IN: &str = "peerbus.ids.incoming";
pub const IDS_OUT: &str = "peerbus.ids.outgoing";
pub const PEERS: &str = "peerbus.peers.active";
pub const STORES: &str = "peerbus.stores.open";
pub const PENDING_QUERIES: &str = "peerbus.queries.pending";

/// Register metric descriptions with the installed recorder
pub fn init_metrics() {
    describe_counter!(EVENTS_IN, "Events received and raised locally");
    describe_counter!(EVENTS_OUT, "Events published");
    describe_counter!(LOGS_IN, "Log records received");
    describe_counter!(LOGS_OUT, "Log records sent in flushed batches");
    describe_counter!(LOGS_DROPPED, "Log writes rejected by the buffer cap");
    describe_counter!(IDS_IN, "Identifier updates received");
    describe_counter!(IDS_OUT, "Identifier updates published");

    describe_gauge!(PEERS, "Number of connected peers");
    describe_gauge!(STORES, "Number of open data stores");
    describe_gauge!(PENDING_QUERIES, "Store queries awaiting an answer");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_init() {
        // No recorder installed; descriptions are discarded
        init_metrics();
    }
}
