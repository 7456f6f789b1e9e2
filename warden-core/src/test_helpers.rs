//! Recording collaborators shared by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::abstractions::{Clock, MockClock, ProcessExecutor, ProcessOutcome, Rebooter};
use crate::config::{ConsensusConfig, ElectionConfig, FailoverConfig};
use crate::consensus::{MemoryConsensus, MemoryStore};
use crate::error::{WardenError, WardenResult};
use crate::failover::{DirectorServices, FailoverContext, FailoverState, NodeStateMachine};
use crate::role::{channel, MailboxReceiver, Role, RoleDeps, RoleTransport};
use crate::timer::TimerWheel;
use crate::types::{HaRole, NodeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    FailOver(NodeId),
    RebootOrder(NodeId),
    Fence(NodeId, String),
    ResetSequence(NodeId),
    MarkMember(NodeId),
    Checkpoint(NodeId, FailoverState),
}

/// Director services that record every call
#[derive(Clone, Default)]
pub struct SharedRecorder {
    actions: Arc<Mutex<Vec<Action>>>,
}

impl SharedRecorder {
    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Action) -> bool) -> usize {
        self.actions.lock().iter().filter(|a| pred(a)).count()
    }

    fn push(&self, action: Action) {
        self.actions.lock().push(action);
    }
}

impl DirectorServices for SharedRecorder {
    fn fail_over_workload(&mut self, node_id: NodeId) {
        self.push(Action::FailOver(node_id));
    }

    fn send_reboot_order(&mut self, node_id: NodeId) {
        self.push(Action::RebootOrder(node_id));
    }

    fn fence_node(&mut self, node_id: NodeId, reason: &str) {
        self.push(Action::Fence(node_id, reason.to_string()));
    }

    fn reset_message_sequence(&mut self, node_id: NodeId) {
        self.push(Action::ResetSequence(node_id));
    }

    fn mark_member(&mut self, node_id: NodeId) {
        self.push(Action::MarkMember(node_id));
    }

    fn send_checkpoint_update(&mut self, node_id: NodeId, state: FailoverState) {
        self.push(Action::Checkpoint(node_id, state));
    }
}

/// Everything needed to build a [`FailoverContext`] around a lone machine
pub struct FailoverHarness {
    pub active: bool,
    pub config: FailoverConfig,
    pub peer_director: Option<NodeId>,
    pub clock: MockClock,
    pub timers: TimerWheel,
    pub services: SharedRecorder,
    pub consensus: MemoryConsensus,
}

impl FailoverHarness {
    pub fn new(active: bool) -> Self {
        let clock = MockClock::new();
        Self {
            active,
            config: FailoverConfig {
                node_failover_delay: Duration::from_secs(10),
                node_failover_node_wait: Duration::from_secs(15),
            },
            peer_director: Some(NodeId(0x2020f)),
            timers: TimerWheel::new(Arc::new(clock.clone())),
            clock,
            services: SharedRecorder::default(),
            consensus: MemoryConsensus::standalone(NodeId(0x2010f), ConsensusConfig::default()),
        }
    }

    pub fn active() -> Self {
        Self::new(true)
    }

    pub fn standby() -> Self {
        Self::new(false)
    }

    pub fn with_ctx<R>(&mut self, f: impl FnOnce(&mut FailoverContext<'_>) -> R) -> R {
        let mut ctx = FailoverContext {
            active: self.active,
            config: &self.config,
            peer_director: self.peer_director,
            timers: &mut self.timers,
            services: &mut self.services,
            consensus: &self.consensus,
        };
        f(&mut ctx)
    }

    /// Time left on the machine's armed timer
    pub fn deadline_of(&self, machine: &NodeStateMachine) -> Option<Duration> {
        let slot = machine.timer().slot()?;
        let deadline = self.timers.deadline(slot)?;
        Some(deadline.duration_since(self.clock.now()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Register,
    Unregister,
    Broadcast(HaRole),
}

/// Role transport that records calls and can be told to fail registration
#[derive(Default)]
pub struct RecordingTransport {
    events: Mutex<Vec<TransportEvent>>,
    fail_registration: AtomicBool,
}

impl RecordingTransport {
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    pub fn fail_registration(&self, fail: bool) {
        self.fail_registration.store(fail, Ordering::SeqCst);
    }

    fn record(&self, event: TransportEvent, operation: &str) -> WardenResult<()> {
        self.events.lock().push(event);
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(WardenError::registration(operation, "injected failure"));
        }
        Ok(())
    }
}

impl RoleTransport for RecordingTransport {
    fn register(&self) -> WardenResult<()> {
        self.record(TransportEvent::Register, "register")
    }

    fn unregister(&self) -> WardenResult<()> {
        self.record(TransportEvent::Unregister, "unregister")
    }

    fn broadcast_role(&self, role: HaRole) {
        self.events.lock().push(TransportEvent::Broadcast(role));
    }
}

/// Executor that records programs instead of running them
#[derive(Default)]
pub struct RecordingExecutor {
    runs: Mutex<Vec<PathBuf>>,
}

impl RecordingExecutor {
    pub fn runs(&self) -> Vec<PathBuf> {
        self.runs.lock().clone()
    }
}

#[async_trait]
impl ProcessExecutor for RecordingExecutor {
    async fn run_with_timeout(
        &self,
        program: &Path,
        _args: &[String],
        _timeout: Duration,
    ) -> WardenResult<ProcessOutcome> {
        self.runs.lock().push(program.to_path_buf());
        Ok(ProcessOutcome::Exited(Some(0)))
    }
}

#[derive(Default)]
pub struct RecordingRebooter {
    reasons: Mutex<Vec<String>>,
}

impl RecordingRebooter {
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }
}

#[async_trait]
impl Rebooter for RecordingRebooter {
    async fn reboot(&self, reason: &str) {
        self.reasons.lock().push(reason.to_string());
    }
}

/// A [`Role`] wired to recording collaborators
pub struct RoleHarness {
    pub role: Role,
    pub mailbox: MailboxReceiver,
    pub clock: MockClock,
    pub consensus: MemoryConsensus,
    pub transport: Arc<RecordingTransport>,
    pub executor: Arc<RecordingExecutor>,
    pub rebooter: Arc<RecordingRebooter>,
}

impl RoleHarness {
    pub fn new(own_node_id: NodeId, consensus: ConsensusConfig, store: Arc<MemoryStore>) -> Self {
        let clock = MockClock::new();
        let consensus = MemoryConsensus::new(own_node_id, consensus, store);
        let transport = Arc::new(RecordingTransport::default());
        let executor = Arc::new(RecordingExecutor::default());
        let rebooter = Arc::new(RecordingRebooter::default());
        let (mailbox_tx, mailbox) = channel();

        let deps = RoleDeps {
            consensus: Arc::new(consensus.clone()),
            transport: transport.clone(),
            executor: executor.clone(),
            rebooter: rebooter.clone(),
            clock: Arc::new(clock.clone()),
        };
        let config = ElectionConfig {
            discover_peer_timeout: Duration::from_secs(2),
            pre_active_script: Some(PathBuf::from("/usr/local/lib/warden/sc_active")),
            pre_active_script_timeout: Duration::from_secs(5),
        };

        Self {
            role: Role::new(own_node_id, config, deps, mailbox_tx),
            mailbox,
            clock,
            consensus,
            transport,
            executor,
            rebooter,
        }
    }
}
