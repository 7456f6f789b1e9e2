// Common fixtures for warden-core integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use warden_core::{
    abstractions::{Clock, MockClock, ProcessExecutor, ProcessOutcome, Rebooter},
    config::{ConsensusConfig, ElectionConfig, FailoverConfig},
    consensus::{MemoryConsensus, MemoryStore},
    error::WardenResult,
    failover::{Director, DirectorServices, FailoverContext, FailoverState, NodeStateMachine},
    role::{channel, MailboxReceiver, RdeMessage, Role, RoleDeps, RoleTransport},
    timer::TimerWheel,
    HaRole, NodeId,
};

pub const THIS_DIRECTOR: NodeId = NodeId(0x2010f);
pub const PEER_DIRECTOR: NodeId = NodeId(0x2020f);
pub const PAYLOAD: NodeId = NodeId(0x2030f);

pub const FAILOVER_DELAY: Duration = Duration::from_secs(10);
pub const NODE_WAIT: Duration = Duration::from_secs(15);
pub const TAKEOVER_VALID_TIME: Duration = Duration::from_secs(20);
pub const DISCOVER_PEER_TIMEOUT: Duration = Duration::from_secs(2);

pub fn failover_config() -> FailoverConfig {
    FailoverConfig {
        node_failover_delay: FAILOVER_DELAY,
        node_failover_node_wait: NODE_WAIT,
    }
}

pub fn consensus_config(enabled: bool) -> ConsensusConfig {
    ConsensusConfig {
        enabled,
        takeover_valid_time: TAKEOVER_VALID_TIME,
        ..ConsensusConfig::default()
    }
}

/// A call made by a state machine on its director
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FailOver(NodeId),
    RebootOrder(NodeId),
    Fence(NodeId, String),
    ResetSequence(NodeId),
    MarkMember(NodeId),
    Checkpoint(NodeId, FailoverState),
}

impl Call {
    /// Calls that act on the cluster, as opposed to replication
    pub fn is_action(&self) -> bool {
        !matches!(self, Call::Checkpoint(..))
    }
}

#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn actions(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_action).collect()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

impl DirectorServices for CallLog {
    fn fail_over_workload(&mut self, node_id: NodeId) {
        self.calls.lock().push(Call::FailOver(node_id));
    }

    fn send_reboot_order(&mut self, node_id: NodeId) {
        self.calls.lock().push(Call::RebootOrder(node_id));
    }

    fn fence_node(&mut self, node_id: NodeId, reason: &str) {
        self.calls.lock().push(Call::Fence(node_id, reason.to_string()));
    }

    fn reset_message_sequence(&mut self, node_id: NodeId) {
        self.calls.lock().push(Call::ResetSequence(node_id));
    }

    fn mark_member(&mut self, node_id: NodeId) {
        self.calls.lock().push(Call::MarkMember(node_id));
    }

    fn send_checkpoint_update(&mut self, node_id: NodeId, state: FailoverState) {
        self.calls.lock().push(Call::Checkpoint(node_id, state));
    }
}

/// A lone node state machine with everything its context borrows
pub struct MachineFixture {
    pub active: bool,
    pub config: FailoverConfig,
    pub peer_director: Option<NodeId>,
    pub clock: MockClock,
    pub timers: TimerWheel,
    pub calls: CallLog,
    pub consensus: MemoryConsensus,
}

impl MachineFixture {
    pub fn new(active: bool, consensus: ConsensusConfig) -> Self {
        let clock = MockClock::new();
        Self {
            active,
            config: failover_config(),
            peer_director: Some(PEER_DIRECTOR),
            timers: TimerWheel::new(Arc::new(clock.clone())),
            clock,
            calls: CallLog::default(),
            consensus: MemoryConsensus::standalone(THIS_DIRECTOR, consensus),
        }
    }

    pub fn active() -> Self {
        Self::new(true, consensus_config(false))
    }

    pub fn standby() -> Self {
        Self::new(false, consensus_config(false))
    }

    pub fn with_ctx<R>(&mut self, f: impl FnOnce(&mut FailoverContext<'_>) -> R) -> R {
        let mut calls = self.calls.clone();
        let mut ctx = FailoverContext {
            active: self.active,
            config: &self.config,
            peer_director: self.peer_director,
            timers: &mut self.timers,
            services: &mut calls,
            consensus: &self.consensus,
        };
        f(&mut ctx)
    }

    /// A machine for `node_id` already in `state`, with the entry timer of
    /// that state armed and no calls recorded
    pub fn machine_in(&mut self, node_id: NodeId, state: FailoverState) -> NodeStateMachine {
        let mut machine = NodeStateMachine::new(node_id);
        self.with_ctx(|ctx| machine.apply_checkpoint(state.as_u32(), ctx))
            .expect("valid state");
        self.calls.clear();
        machine
    }

    /// Time left on the machine's armed timer
    pub fn armed_for(&self, machine: &NodeStateMachine) -> Option<Duration> {
        let slot = machine.timer().slot()?;
        let deadline = self.timers.deadline(slot)?;
        Some(deadline.duration_since(self.clock.now()))
    }
}

/// A director with a mock clock and recorded calls
pub struct DirectorFixture {
    pub director: Director,
    pub clock: MockClock,
    pub calls: CallLog,
}

impl DirectorFixture {
    pub fn new(role: HaRole, consensus: ConsensusConfig) -> Self {
        let clock = MockClock::new();
        let calls = CallLog::default();
        let mut director = Director::new(
            failover_config(),
            Some(PEER_DIRECTOR),
            Arc::new(clock.clone()),
            Box::new(calls.clone()),
            Arc::new(MemoryConsensus::standalone(THIS_DIRECTOR, consensus)),
        );
        director.set_ha_role(role);
        Self {
            director,
            clock,
            calls,
        }
    }

    pub fn active() -> Self {
        Self::new(HaRole::Active, consensus_config(false))
    }

    /// Advance the clock and deliver due timers
    pub fn elapse(&mut self, duration: Duration) -> usize {
        self.clock.advance(duration);
        self.director.expire_timers()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Register,
    Unregister,
    Broadcast(HaRole),
}

#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<TransportCall>>,
}

impl FakeTransport {
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().clone()
    }
}

impl RoleTransport for FakeTransport {
    fn register(&self) -> WardenResult<()> {
        self.calls.lock().push(TransportCall::Register);
        Ok(())
    }

    fn unregister(&self) -> WardenResult<()> {
        self.calls.lock().push(TransportCall::Unregister);
        Ok(())
    }

    fn broadcast_role(&self, role: HaRole) {
        self.calls.lock().push(TransportCall::Broadcast(role));
    }
}

#[derive(Default)]
pub struct FakeExecutor {
    runs: AtomicUsize,
}

impl FakeExecutor {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessExecutor for FakeExecutor {
    async fn run_with_timeout(
        &self,
        _program: &Path,
        _args: &[String],
        _timeout: Duration,
    ) -> WardenResult<ProcessOutcome> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessOutcome::Exited(Some(0)))
    }
}

#[derive(Default)]
pub struct FakeRebooter {
    reasons: Mutex<Vec<String>>,
}

impl FakeRebooter {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }

    pub fn rebooted(&self) -> bool {
        !self.reasons.lock().is_empty()
    }
}

#[async_trait]
impl Rebooter for FakeRebooter {
    async fn reboot(&self, reason: &str) {
        self.reasons.lock().push(reason.to_string());
    }
}

/// One system controller's election engine with fake collaborators
pub struct Controller {
    pub role: Role,
    pub mailbox: MailboxReceiver,
    pub clock: MockClock,
    pub consensus: MemoryConsensus,
    pub transport: Arc<FakeTransport>,
    pub executor: Arc<FakeExecutor>,
    pub rebooter: Arc<FakeRebooter>,
}

impl Controller {
    pub fn new(node_id: NodeId, consensus: ConsensusConfig, store: Arc<MemoryStore>) -> Self {
        Self::with_clock(node_id, consensus, store, MockClock::new())
    }

    pub fn with_clock(
        node_id: NodeId,
        consensus: ConsensusConfig,
        store: Arc<MemoryStore>,
        clock: MockClock,
    ) -> Self {
        let consensus = MemoryConsensus::new(node_id, consensus, store);
        let transport = Arc::new(FakeTransport::default());
        let executor = Arc::new(FakeExecutor::default());
        let rebooter = Arc::new(FakeRebooter::default());
        let (tx, mailbox) = channel();

        let deps = RoleDeps {
            consensus: Arc::new(consensus.clone()),
            transport: transport.clone(),
            executor: executor.clone(),
            rebooter: rebooter.clone(),
            clock: Arc::new(clock.clone()),
        };
        let config = ElectionConfig {
            discover_peer_timeout: DISCOVER_PEER_TIMEOUT,
            pre_active_script: Some(PathBuf::from("/usr/local/lib/warden/sc_active")),
            pre_active_script_timeout: Duration::from_secs(5),
        };

        Self {
            role: Role::new(node_id, config, deps, tx),
            mailbox,
            clock,
            consensus,
            transport,
            executor,
            rebooter,
        }
    }

    /// Open the election and let the discovery window run out
    pub async fn expire_election_window(&mut self) -> Option<Duration> {
        self.clock.advance(DISCOVER_PEER_TIMEOUT);
        self.role.poll().await
    }

    /// Deliver every message currently queued in the mailbox
    pub async fn drain_mailbox(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(message) = self.mailbox.try_recv() {
            self.role.handle_message(message).await;
            delivered += 1;
        }
        delivered
    }
}

/// Yield to other tasks until `condition` holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Wait for the next message a background task posts to the mailbox
pub async fn next_message(mailbox: &mut MailboxReceiver) -> RdeMessage {
    for _ in 0..1_000 {
        if let Ok(message) = mailbox.try_recv() {
            return message;
        }
        tokio::task::yield_now().await;
    }
    panic!("no message posted");
}

/// Advance mock time in steps until the task has finished
pub async fn drive_until_finished<T>(clock: &MockClock, task: &JoinHandle<T>, step: Duration) {
    for _ in 0..100 {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        if task.is_finished() {
            return;
        }
        clock.advance(step);
    }
    panic!("task did not finish");
}
