//! State shared by the radio bridge, the pipeline and the server.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use radiobus_bridge_framework::{BridgeHealth, LinkStatus};

/// Gateway-wide state, injected into every task.
#[derive(Debug)]
pub struct GatewayState {
    known: Mutex<HashSet<String>>,
    health: Arc<BridgeHealth>,
}

impl GatewayState {
    pub fn new(health: Arc<BridgeHealth>) -> Self {
        Self {
            known: Mutex::new(HashSet::new()),
            health,
        }
    }

    /// Record a sender address. Returns `true` the first time it is seen.
    pub fn note_address(&self, mac: &str) -> bool {
        self.known.lock().insert(mac.to_string())
    }

    /// Every sender seen since startup, sorted.
    pub fn known_addresses(&self) -> Vec<String> {
        let mut all: Vec<_> = self.known.lock().iter().cloned().collect();
        all.sort();
        all
    }

    pub fn set_link_status(&self, status: LinkStatus) {
        self.health.set_link_status(status);
    }

    pub fn link_status(&self) -> LinkStatus {
        self.health.link_status()
    }

    pub fn health(&self) -> &Arc<BridgeHealth> {
        &self.health
    }
}
