//! Per-node failover state machine
//!
//! | State         | Entry                     | Armed timer               |
//! |---------------|---------------------------|---------------------------|
//! | Start         | stop timer                | none                      |
//! | Lost          | restart timer             | failover delay            |
//! | LostFound     | restart timer             | `node_failover_node_wait` |
//! | LostRebooting | restart timer             | `node_failover_node_wait` |
//! | Failed        | stop timer                | none                      |
//! | FailedFound   | restart timer             | `node_failover_node_wait` |
//! | End           | stop timer                | none                      |
//!
//! Only the active director acts on timer expiry. A standby re-arms the
//! timer and waits for the active director's checkpoint instead.

use std::fmt;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::DirectorServices;
use crate::config::FailoverConfig;
use crate::consensus::ConsensusClient;
use crate::error::WardenError;
use crate::timer::{Timer, TimerWheel};
use crate::types::NodeId;

/// Failover state of a tracked node; the discriminants are the checkpoint encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum FailoverState {
    Start = 1,
    Lost = 2,
    LostFound = 3,
    LostRebooting = 4,
    Failed = 5,
    FailedFound = 6,
    End = 7,
}

impl FailoverState {
    pub const ALL: [FailoverState; 7] = [
        FailoverState::Start,
        FailoverState::Lost,
        FailoverState::LostFound,
        FailoverState::LostRebooting,
        FailoverState::Failed,
        FailoverState::FailedFound,
        FailoverState::End,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for FailoverState {
    type Error = WardenError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        FailoverState::ALL
            .into_iter()
            .find(|state| state.as_u32() == value)
            .ok_or(WardenError::InvalidFailoverState { value })
    }
}

impl fmt::Display for FailoverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Events delivered to a node state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeEvent {
    TimerExpired,
    MdsUp,
    MdsDown,
    NodeUp,
}

impl NodeEvent {
    pub const ALL: [NodeEvent; 4] = [
        NodeEvent::TimerExpired,
        NodeEvent::MdsUp,
        NodeEvent::MdsDown,
        NodeEvent::NodeUp,
    ];
}

/// Everything a state machine needs from its director while handling an event
pub struct FailoverContext<'a> {
    /// Whether this director is currently the cluster's active director
    pub active: bool,
    pub config: &'a FailoverConfig,
    pub peer_director: Option<NodeId>,
    pub timers: &'a mut TimerWheel,
    pub services: &'a mut dyn DirectorServices,
    pub consensus: &'a dyn ConsensusClient,
}

/// Failover state machine for one cluster node
#[derive(Debug)]
pub struct NodeStateMachine {
    node_id: NodeId,
    state: FailoverState,
    timer: Timer,
}

impl NodeStateMachine {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: FailoverState::Start,
            timer: Timer::new(node_id),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn state(&self) -> FailoverState {
        self.state
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    /// The machine reached `End` and must be dropped by its owner
    pub fn is_finished(&self) -> bool {
        self.state == FailoverState::End
    }

    /// How long a lost node is given before its workload is failed over.
    ///
    /// For the peer director this is twice the consensus takeover valid
    /// time, so the consensus service has fenced a stalled peer before the
    /// local decision is taken.
    pub fn failover_delay(&self, ctx: &FailoverContext<'_>) -> Duration {
        if ctx.peer_director == Some(self.node_id) {
            ctx.consensus.takeover_valid_time() * 2
        } else {
            ctx.config.node_failover_delay
        }
    }

    pub fn handle(&mut self, event: NodeEvent, ctx: &mut FailoverContext<'_>) {
        match event {
            NodeEvent::TimerExpired => self.timer_expired(ctx),
            NodeEvent::MdsUp => self.mds_up(ctx),
            NodeEvent::MdsDown => self.mds_down(ctx),
            NodeEvent::NodeUp => self.node_up(ctx),
        }
    }

    pub fn timer_expired(&mut self, ctx: &mut FailoverContext<'_>) {
        // The expiry may have been injected by hand
        self.timer.stop(ctx.timers);
        let node = self.node_id;

        match self.state {
            FailoverState::Start | FailoverState::Failed => {
                error!("unexpected timer event for '{}'", node)
            }
            FailoverState::Lost => {
                if ctx.active {
                    info!("Completing delayed node failover for '{}'", node);
                    ctx.services.fail_over_workload(node);
                    self.set_state(FailoverState::Failed, ctx);
                } else {
                    trace!(
                        "Timer expired in 'Lost' state for '{}' on standby. Restart timer",
                        node
                    );
                    let delay = self.failover_delay(ctx);
                    self.timer.start(ctx.timers, delay);
                }
            }
            FailoverState::LostFound => {
                warn!("Lost node '{}' has reappeared after network separation", node);
                if ctx.active {
                    // The node believes it was headless and restarted its
                    // receive sequence from zero
                    ctx.services.reset_message_sequence(node);
                    warn!("Sending node reboot order to '{}'", node);
                    ctx.services.send_reboot_order(node);
                    self.set_state(FailoverState::LostRebooting, ctx);
                } else {
                    self.restart_standby_timer(ctx);
                }
            }
            FailoverState::LostRebooting => {
                if ctx.active {
                    info!("Completing delayed node failover for '{}'", node);
                    ctx.services.fail_over_workload(node);
                    self.set_state(FailoverState::End, ctx);
                } else {
                    self.restart_standby_timer(ctx);
                }
            }
            FailoverState::FailedFound => {
                warn!("Failed node '{}' has reappeared after network separation", node);
                if ctx.active {
                    warn!("Sending node reboot order to '{}'", node);
                    ctx.services.send_reboot_order(node);
                    self.set_state(FailoverState::End, ctx);
                } else {
                    self.restart_standby_timer(ctx);
                }
            }
            FailoverState::End => self.terminal_violation(NodeEvent::TimerExpired),
        }
    }

    pub fn mds_up(&mut self, ctx: &mut FailoverContext<'_>) {
        match self.state {
            FailoverState::Start => trace!("MDS up for '{}'", self.node_id),
            FailoverState::Lost => self.set_state(FailoverState::LostFound, ctx),
            FailoverState::Failed => self.set_state(FailoverState::FailedFound, ctx),
            FailoverState::LostFound
            | FailoverState::LostRebooting
            | FailoverState::FailedFound => {
                if ctx.active {
                    error!("unexpected MDS up event for '{}'", self.node_id);
                }
            }
            FailoverState::End => self.terminal_violation(NodeEvent::MdsUp),
        }
    }

    pub fn mds_down(&mut self, ctx: &mut FailoverContext<'_>) {
        let node = self.node_id;

        match self.state {
            FailoverState::Start => {
                if ctx.active && ctx.consensus.is_remote_fencing_enabled() {
                    ctx.services.fence_node(node, "Fencing remote node");
                    ctx.services.fail_over_workload(node);
                    self.set_state(FailoverState::End, ctx);
                } else {
                    self.set_state(FailoverState::Lost, ctx);
                }
            }
            FailoverState::Lost => {
                if ctx.active {
                    error!("unexpected MDS down event for '{}'", node);
                }
            }
            FailoverState::LostRebooting => {
                if ctx.active {
                    warn!("Node '{}' is down. Failover its previous assignments", node);
                    ctx.services.fail_over_workload(node);
                    self.set_state(FailoverState::End, ctx);
                }
            }
            FailoverState::LostFound | FailoverState::Failed | FailoverState::FailedFound => {
                warn!("unexpected MDS down event for '{}'", node)
            }
            FailoverState::End => self.terminal_violation(NodeEvent::MdsDown),
        }
    }

    pub fn node_up(&mut self, ctx: &mut FailoverContext<'_>) {
        let node = self.node_id;

        match self.state {
            FailoverState::Start => trace!("node up for '{}'", node),
            FailoverState::Lost | FailoverState::LostRebooting => {
                error!("unexpected node up event for '{}'", node)
            }
            FailoverState::LostFound => {
                if ctx.active {
                    // The node is already up, so it is not removed first
                    ctx.services.fail_over_workload(node);
                    ctx.services.mark_member(node);
                    self.set_state(FailoverState::End, ctx);
                } else {
                    error!("unexpected node up event for '{}'", node);
                }
            }
            FailoverState::Failed => {
                // The node is evidently back even though MDS up was missed
                warn!("unexpected node up event for '{}'", node);
                self.set_state(FailoverState::FailedFound, ctx);
            }
            FailoverState::FailedFound => self.set_state(FailoverState::End, ctx),
            FailoverState::End => self.terminal_violation(NodeEvent::NodeUp),
        }
    }

    /// Transition decided by this director; replicated to the standby
    pub fn set_state(&mut self, next: FailoverState, ctx: &mut FailoverContext<'_>) {
        info!("Node '{}' failover state {} -> {}", self.node_id, self.state, next);
        self.state = next;
        self.enter(ctx);
        ctx.services.send_checkpoint_update(self.node_id, next);
    }

    /// Mirror a state checkpointed by the active director.
    ///
    /// Returns `Ok(false)` when the state is unchanged. Only entry timers are
    /// applied; no failover action is taken.
    pub fn apply_checkpoint(
        &mut self,
        raw: u32,
        ctx: &mut FailoverContext<'_>,
    ) -> Result<bool, WardenError> {
        debug!(
            "'{}', state '{}', current state '{}'",
            self.node_id,
            raw,
            self.state.as_u32()
        );

        let state = FailoverState::try_from(raw).map_err(|e| {
            error!("undefined state '{}'", raw);
            e
        })?;

        if state == self.state {
            info!("Node state unchanged");
            return Ok(false);
        }

        info!("New state '{}' for '{}'", state, self.node_id);
        self.state = state;
        self.enter(ctx);
        Ok(true)
    }

    /// Release the machine's timer slot
    pub fn stop_timer(&mut self, timers: &mut TimerWheel) {
        self.timer.stop(timers);
    }

    fn enter(&mut self, ctx: &mut FailoverContext<'_>) {
        match self.state {
            FailoverState::Start | FailoverState::Failed | FailoverState::End => {
                self.timer.stop(ctx.timers)
            }
            FailoverState::Lost => {
                let delay = self.failover_delay(ctx);
                info!("Start timer for '{}'", self.node_id);
                self.timer.start(ctx.timers, delay);
            }
            FailoverState::LostFound
            | FailoverState::LostRebooting
            | FailoverState::FailedFound => {
                self.timer
                    .start(ctx.timers, ctx.config.node_failover_node_wait)
            }
        }
    }

    fn restart_standby_timer(&mut self, ctx: &mut FailoverContext<'_>) {
        trace!(
            "Timer expired in '{}' state for '{}' on standby. Restart timer",
            self.state,
            self.node_id
        );
        self.timer
            .start(ctx.timers, ctx.config.node_failover_node_wait);
    }

    fn terminal_violation(&self, event: NodeEvent) -> ! {
        panic!(
            "node '{}' received {:?} after reaching End; the machine should have been removed",
            self.node_id, event
        );
    }
}
