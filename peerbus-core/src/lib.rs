//! peerbus - the communication manager of a network-monitoring engine
//!
//! A [`Manager`] publishes events, log streams and identifier values over a
//! topic-based transport, receives them from peers and hands them to the
//! host engine, and replicates key-value data stores between nodes.

pub mod config;
pub mod core_host;
pub mod core_logbuf;
pub mod core_manager;
pub mod core_store;
pub mod core_transport;
pub mod core_wire;
pub mod logging;
pub mod metrics;
pub mod test_utils;

pub use config::{Config, ConfigError};
pub use core_manager::{Clock, EventRecord, Manager, ManagerError, ManagerResult};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogLevel};
pub use metrics::Stats;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = Config::default();
    }
}
