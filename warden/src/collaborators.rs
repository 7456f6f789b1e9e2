//! Collaborators used when the daemon runs without a cluster transport
//!
//! Actions the failover engine and the election engine request from the
//! rest of the cluster are logged. Role changes are also forwarded to the
//! local director, which is the one local client of the role broadcast.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use warden_core::failover::{DirectorEvent, DirectorServices, FailoverState};
use warden_core::role::RoleTransport;
use warden_core::{HaRole, NodeId, WardenResult};

/// Role transport that logs registration and hands role changes to the director
pub struct LoggingTransport {
    director: mpsc::Sender<DirectorEvent>,
    last_role: Mutex<Option<HaRole>>,
}

impl LoggingTransport {
    pub fn new(director: mpsc::Sender<DirectorEvent>) -> Self {
        Self {
            director,
            last_role: Mutex::new(None),
        }
    }

    /// The most recently broadcast role
    pub fn last_role(&self) -> Option<HaRole> {
        *self.last_role.lock()
    }
}

impl RoleTransport for LoggingTransport {
    fn register(&self) -> WardenResult<()> {
        info!("Registered for role-based traffic");
        Ok(())
    }

    fn unregister(&self) -> WardenResult<()> {
        info!("Unregistered from role-based traffic");
        Ok(())
    }

    fn broadcast_role(&self, role: HaRole) {
        info!("Broadcasting role {}", role);
        *self.last_role.lock() = Some(role);

        if let Err(e) = self.director.try_send(DirectorEvent::SetHaRole(role)) {
            warn!("Failed to hand role {} to the director: {}", role, e);
        }
    }
}

/// Director services that only log the requested actions
#[derive(Debug, Default)]
pub struct LoggingServices;

impl DirectorServices for LoggingServices {
    fn fail_over_workload(&mut self, node_id: NodeId) {
        info!("Failing over workload of '{}'", node_id);
    }

    fn send_reboot_order(&mut self, node_id: NodeId) {
        warn!("Reboot order for '{}'", node_id);
    }

    fn fence_node(&mut self, node_id: NodeId, reason: &str) {
        warn!("Fencing '{}': {}", node_id, reason);
    }

    fn reset_message_sequence(&mut self, node_id: NodeId) {
        debug!("Resetting message sequence of '{}'", node_id);
    }

    fn mark_member(&mut self, node_id: NodeId) {
        info!("'{}' is a cluster member again", node_id);
    }

    fn send_checkpoint_update(&mut self, node_id: NodeId, state: FailoverState) {
        debug!("Checkpoint '{}' -> {}", node_id, state);
    }
}
