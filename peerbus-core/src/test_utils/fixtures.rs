//! Test fixtures for building managers on an in-memory mesh

use super::host::RecordingHost;
use crate::config::Config;
use crate::core_manager::Manager;
use crate::core_store::{QueryCallback, QueryOutcome};
use crate::core_transport::{MeshEndpoint, MeshNetwork};
use std::cell::RefCell;
use std::rc::Rc;

pub type TestManager = Manager<MeshEndpoint, RecordingHost>;

/// Enough rounds for a handshake plus a request/response exchange
const PUMP_ROUNDS: usize = 8;

/// Default configuration with the simulated clock
pub fn simulated_config() -> Config {
    let mut config = Config::default();
    config.manager.use_real_time = false;
    config
}

/// A manager on its own endpoint of `network`, simulated time starting at 0
pub fn simulated_manager(network: &MeshNetwork) -> TestManager {
    manager_with_config(network, &simulated_config())
}

pub fn manager_with_config(network: &MeshNetwork, config: &Config) -> TestManager {
    let mut manager = Manager::new(config, network.endpoint(), RecordingHost::new());
    manager.init_post_script();
    manager
}

/// Process every manager in turn, several times over, so that messages
/// bouncing between them settle
pub fn pump(managers: &mut [&mut TestManager]) {
    for _ in 0..PUMP_ROUNDS {
        for manager in managers.iter_mut() {
            manager.process();
        }
    }
}

/// Move every manager's clock to `to`, then pump
pub fn advance_all(managers: &mut [&mut TestManager], to: f64) {
    for manager in managers.iter_mut() {
        if let Err(e) = manager.advance_time(to) {
            panic!("cannot advance to {}: {}", to, e);
        }
    }
    pump(managers);
}

/// Query callback that records its outcomes in a shared slot
pub fn outcome_slot() -> (Rc<RefCell<Vec<QueryOutcome>>>, QueryCallback) {
    let slot = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&slot);
    let callback: QueryCallback = Box::new(move |outcome| sink.borrow_mut().push(outcome));
    (slot, callback)
}
