//! Node failover tracking for the cluster director
//!
//! The active director runs one [`NodeStateMachine`] per cluster node whose
//! reachability is in question. The machine decides when a lost node's
//! workload is failed over and when a returning node must be rebooted.
//! The standby director mirrors the machines through checkpoints and never
//! acts on them.

pub mod director;
pub mod state_machine;

pub use director::{Director, DirectorEvent, FailoverList};
pub use state_machine::{FailoverContext, FailoverState, NodeEvent, NodeStateMachine};

use crate::types::NodeId;

/// Actions the director performs on behalf of a node state machine
///
/// All actions are fire-and-forget; their outcome is never fed back into
/// the state machine.
pub trait DirectorServices: Send {
    /// Reassign all workload previously hosted on `node_id`
    fn fail_over_workload(&mut self, node_id: NodeId);

    /// Order `node_id` to reboot itself
    fn send_reboot_order(&mut self, node_id: NodeId);

    /// Forcibly reboot `node_id` from outside
    fn fence_node(&mut self, node_id: NodeId, reason: &str);

    /// Reset the sequence number of messages sent to `node_id`
    fn reset_message_sequence(&mut self, node_id: NodeId);

    /// Re-admit `node_id` as a cluster member
    fn mark_member(&mut self, node_id: NodeId);

    /// Replicate the failover state of `node_id` to the standby director
    fn send_checkpoint_update(&mut self, node_id: NodeId, state: FailoverState);
}
