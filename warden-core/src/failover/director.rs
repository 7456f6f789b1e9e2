//! Director control block
//!
//! The [`Director`] owns the failover list, the timer wheel, and this
//! director's HA role. It is driven from a single task: every MDS event,
//! timer expiry and checkpoint goes through `&mut self`, so no state here
//! is ever shared across threads.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::state_machine::{FailoverContext, FailoverState, NodeEvent, NodeStateMachine};
use super::DirectorServices;
use crate::abstractions::Clock;
use crate::config::FailoverConfig;
use crate::consensus::ConsensusClient;
use crate::error::WardenResult;
use crate::observability::failover_span;
use crate::timer::TimerWheel;
use crate::types::{HaRole, NodeId};

/// Node state machines with a failover in progress, keyed by node id
#[derive(Debug, Default)]
pub struct FailoverList {
    machines: BTreeMap<NodeId, NodeStateMachine>,
}

impl FailoverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: NodeId) -> Option<&NodeStateMachine> {
        self.machines.get(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.machines.contains_key(&node_id)
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeStateMachine> {
        self.machines.values()
    }

    fn get_or_create(&mut self, node_id: NodeId) -> &mut NodeStateMachine {
        self.machines.entry(node_id).or_insert_with(|| {
            debug!("Tracking failover of '{}'", node_id);
            NodeStateMachine::new(node_id)
        })
    }

    fn get_mut(&mut self, node_id: NodeId) -> Option<&mut NodeStateMachine> {
        self.machines.get_mut(&node_id)
    }

    fn remove(&mut self, node_id: NodeId) -> Option<NodeStateMachine> {
        self.machines.remove(&node_id)
    }
}

/// Inputs of the director's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorEvent {
    MdsUp(NodeId),
    MdsDown(NodeId),
    NodeUp(NodeId),
    /// A failover state checkpointed by the active director
    Checkpoint { node_id: NodeId, state: u32 },
    /// Full state sync from the active director
    ColdSync(Vec<(NodeId, u32)>),
    SetHaRole(HaRole),
    Untrack(NodeId),
    Shutdown,
}

/// The cluster director's failover control block
pub struct Director {
    ha_role: HaRole,
    config: FailoverConfig,
    peer_director: Option<NodeId>,
    failover_list: FailoverList,
    timers: TimerWheel,
    services: Box<dyn DirectorServices>,
    consensus: Arc<dyn ConsensusClient>,
}

impl Director {
    pub fn new(
        config: FailoverConfig,
        peer_director: Option<NodeId>,
        clock: Arc<dyn Clock>,
        services: Box<dyn DirectorServices>,
        consensus: Arc<dyn ConsensusClient>,
    ) -> Self {
        Self {
            ha_role: HaRole::Undefined,
            config,
            peer_director,
            failover_list: FailoverList::new(),
            timers: TimerWheel::new(clock),
            services,
            consensus,
        }
    }

    pub fn ha_role(&self) -> HaRole {
        self.ha_role
    }

    pub fn is_active(&self) -> bool {
        self.ha_role == HaRole::Active
    }

    pub fn set_ha_role(&mut self, role: HaRole) {
        if role != self.ha_role {
            info!("Director HA role {} -> {}", self.ha_role, role);
            self.ha_role = role;
        }
    }

    pub fn failover_list(&self) -> &FailoverList {
        &self.failover_list
    }

    pub fn state_of(&self, node_id: NodeId) -> Option<FailoverState> {
        self.failover_list.get(node_id).map(|machine| machine.state())
    }

    pub fn timers(&self) -> &TimerWheel {
        &self.timers
    }

    pub fn mds_up(&mut self, node_id: NodeId) {
        self.dispatch(node_id, NodeEvent::MdsUp, true);
    }

    pub fn mds_down(&mut self, node_id: NodeId) {
        self.dispatch(node_id, NodeEvent::MdsDown, true);
    }

    /// Node up from a node with no failover in progress is normal and ignored
    pub fn node_up(&mut self, node_id: NodeId) {
        self.dispatch(node_id, NodeEvent::NodeUp, false);
    }

    /// Deliver every due timer expiry; returns how many were delivered
    pub fn expire_timers(&mut self) -> usize {
        let mut delivered = 0;

        for (timer_id, node_id) in self.timers.expire() {
            let current = self
                .failover_list
                .get(node_id)
                .map(|machine| machine.timer().matches(timer_id))
                .unwrap_or(false);

            if current {
                self.dispatch(node_id, NodeEvent::TimerExpired, false);
                delivered += 1;
            } else {
                debug!("Ignoring stale timer {:?} for '{}'", timer_id, node_id);
            }
        }

        delivered
    }

    /// Mirror one checkpointed failover state
    pub fn apply_checkpoint(&mut self, node_id: NodeId, state: u32) -> WardenResult<bool> {
        let _span = failover_span(node_id).entered();

        let Self {
            ha_role,
            config,
            peer_director,
            failover_list,
            timers,
            services,
            consensus,
        } = self;

        let machine = failover_list.get_or_create(node_id);
        let mut ctx = FailoverContext {
            active: *ha_role == HaRole::Active,
            config,
            peer_director: *peer_director,
            timers,
            services: &mut **services,
            consensus: &**consensus,
        };

        let changed = machine.apply_checkpoint(state, &mut ctx)?;
        if machine.is_finished() {
            failover_list.remove(node_id);
        }
        Ok(changed)
    }

    /// Failover states of every tracked node, for a full state sync
    pub fn checkpoint_snapshot(&self) -> Vec<(NodeId, u32)> {
        self.failover_list
            .iter()
            .map(|machine| (machine.node_id(), machine.state().as_u32()))
            .collect()
    }

    /// Replace the tracked machines with a full state sync from the active director
    pub fn apply_checkpoint_snapshot(&mut self, snapshot: &[(NodeId, u32)]) -> WardenResult<()> {
        let stale: Vec<NodeId> = self
            .failover_list
            .iter()
            .map(|machine| machine.node_id())
            .filter(|node_id| !snapshot.iter().any(|(id, _)| id == node_id))
            .collect();

        for node_id in stale {
            self.untrack(node_id);
        }

        for (node_id, state) in snapshot {
            self.apply_checkpoint(*node_id, *state)?;
        }

        Ok(())
    }

    /// Stop tracking a node, cancelling its timer
    pub fn untrack(&mut self, node_id: NodeId) -> bool {
        match self.failover_list.remove(node_id) {
            Some(mut machine) => {
                machine.stop_timer(&mut self.timers);
                debug!("Stopped tracking failover of '{}'", node_id);
                true
            }
            None => false,
        }
    }

    fn dispatch(&mut self, node_id: NodeId, event: NodeEvent, create: bool) {
        let _span = failover_span(node_id).entered();

        let Self {
            ha_role,
            config,
            peer_director,
            failover_list,
            timers,
            services,
            consensus,
        } = self;

        let machine = if create {
            failover_list.get_or_create(node_id)
        } else {
            match failover_list.get_mut(node_id) {
                Some(machine) => machine,
                None => {
                    debug!("No failover in progress for '{}', ignoring {:?}", node_id, event);
                    return;
                }
            }
        };

        let mut ctx = FailoverContext {
            active: *ha_role == HaRole::Active,
            config,
            peer_director: *peer_director,
            timers,
            services: &mut **services,
            consensus: &**consensus,
        };
        machine.handle(event, &mut ctx);

        if machine.is_finished() {
            failover_list.remove(node_id);
            debug!("Failover of '{}' completed", node_id);
        }
    }

    /// Handle one event; returns false on shutdown
    pub fn handle_event(&mut self, event: DirectorEvent) -> bool {
        match event {
            DirectorEvent::MdsUp(node_id) => self.mds_up(node_id),
            DirectorEvent::MdsDown(node_id) => self.mds_down(node_id),
            DirectorEvent::NodeUp(node_id) => self.node_up(node_id),
            DirectorEvent::Checkpoint { node_id, state } => {
                if let Err(e) = self.apply_checkpoint(node_id, state) {
                    error!("Failed to apply checkpoint for '{}': {}", node_id, e);
                }
            }
            DirectorEvent::ColdSync(snapshot) => {
                if let Err(e) = self.apply_checkpoint_snapshot(&snapshot) {
                    error!("Failed to apply failover state sync: {}", e);
                }
            }
            DirectorEvent::SetHaRole(role) => self.set_ha_role(role),
            DirectorEvent::Untrack(node_id) => {
                self.untrack(node_id);
            }
            DirectorEvent::Shutdown => return false,
        }
        true
    }

    /// Run the director until shutdown or until all senders are gone
    pub async fn run(mut self, mut events: mpsc::Receiver<DirectorEvent>) {
        info!("Director started as {}", self.ha_role);

        loop {
            let wait = self.timers.time_until_next();
            let clock = Arc::clone(self.timers.clock());

            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(event) {
                            break;
                        }
                    }
                    None => {
                        warn!("Director event channel closed");
                        break;
                    }
                },
                _ = async {
                    match wait {
                        Some(duration) => clock.sleep(duration).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    self.expire_timers();
                }
            }
        }

        info!("Director stopped with {} node(s) still tracked", self.failover_list.len());
    }
}
