//! Monotonic timer engine for node failover timers
//!
//! The [`TimerWheel`] is owned by the director's dispatch loop. Each
//! [`NodeStateMachine`](crate::failover::NodeStateMachine) owns one [`Timer`],
//! a handle into a wheel slot; arming a timer always disarms the previous
//! slot, so a machine never has two pending timers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::abstractions::{Clock, Instant};
use crate::types::NodeId;

/// Opaque handle of an armed timer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

/// Deadline-ordered set of armed node timers
pub struct TimerWheel {
    clock: Arc<dyn Clock>,
    next_id: u64,
    deadlines: BTreeMap<(Instant, TimerId), NodeId>,
    armed: HashMap<TimerId, Instant>,
}

impl TimerWheel {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: 1,
            deadlines: BTreeMap::new(),
            armed: HashMap::new(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Arm a timer for `node_id` expiring `after` from now
    pub fn start(&mut self, node_id: NodeId, after: Duration) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let deadline = self.clock.now().saturating_add(after);
        self.deadlines.insert((deadline, id), node_id);
        self.armed.insert(id, deadline);
        id
    }

    /// Disarm a timer; returns false if it was not armed
    pub fn stop(&mut self, id: TimerId) -> bool {
        match self.armed.remove(&id) {
            Some(deadline) => {
                self.deadlines.remove(&(deadline, id));
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id)
    }

    pub fn deadline(&self, id: TimerId) -> Option<Instant> {
        self.armed.get(&id).copied()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Time left until the earliest deadline, zero if already due
    pub fn time_until_next(&self) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.duration_since(self.clock.now()))
    }

    /// Remove and return every timer whose deadline has passed, earliest first
    pub fn expire(&mut self) -> Vec<(TimerId, NodeId)> {
        let now = self.clock.now();
        let mut expired = Vec::new();

        while let Some((&(deadline, id), &node_id)) = self.deadlines.iter().next() {
            if deadline > now {
                break;
            }
            self.deadlines.remove(&(deadline, id));
            self.armed.remove(&id);
            expired.push((id, node_id));
        }

        expired
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

/// A single-owner timer bound to one node
#[derive(Debug)]
pub struct Timer {
    node_id: NodeId,
    slot: Option<TimerId>,
}

impl Timer {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            slot: None,
        }
    }

    /// Stop any pending expiry and arm the timer again
    pub fn start(&mut self, wheel: &mut TimerWheel, after: Duration) {
        self.stop(wheel);
        self.slot = Some(wheel.start(self.node_id, after));
    }

    pub fn stop(&mut self, wheel: &mut TimerWheel) {
        if let Some(id) = self.slot.take() {
            wheel.stop(id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot.is_some()
    }

    pub fn slot(&self) -> Option<TimerId> {
        self.slot
    }

    /// Whether an expiry of `id` belongs to the currently armed slot
    pub fn matches(&self, id: TimerId) -> bool {
        self.slot == Some(id)
    }
}
