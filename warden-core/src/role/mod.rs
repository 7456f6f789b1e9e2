//! Controller role election
//!
//! [`Role`] decides whether this system controller becomes ACTIVE. During
//! the discovery window the role is `Undefined` and peers negotiate: a peer
//! that is already active or standby, or an undefined peer with a lower node
//! id, wins. When the window closes without a winner this node races for the
//! consensus lock in a background task.
//!
//! All role state is owned by the task running [`Role::run`]. Background
//! tasks report back through the [`Mailbox`].

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn, Instrument};

use crate::abstractions::{Clock, Instant, ProcessExecutor, ProcessOutcome, Rebooter};
use crate::config::ElectionConfig;
use crate::consensus::{ConsensusClient, ConsensusKey};
use crate::error::WardenResult;
use crate::observability::election_span;
use crate::types::{ActivityState, HaRole, NodeId};

pub mod mailbox;
pub mod promotion;
pub mod transport;

pub use mailbox::{channel, Mailbox, MailboxReceiver, RdeMessage};
pub use promotion::{PromotionOutcome, Promoter};
pub use transport::RoleTransport;

/// External collaborators of the election engine
#[derive(Clone)]
pub struct RoleDeps {
    pub consensus: Arc<dyn ConsensusClient>,
    pub transport: Arc<dyn RoleTransport>,
    pub executor: Arc<dyn ProcessExecutor>,
    pub rebooter: Arc<dyn Rebooter>,
    pub clock: Arc<dyn Clock>,
}

/// The election and HA role engine of this controller
pub struct Role {
    own_node_id: NodeId,
    role: HaRole,
    known_nodes: BTreeSet<NodeId>,
    peer_controllers: BTreeSet<NodeId>,
    activity: ActivityState,
    election_end_time: Instant,
    cluster_size: u64,
    config: ElectionConfig,
    deps: RoleDeps,
    mailbox: Mailbox,
    promotion: Option<JoinHandle<PromotionOutcome>>,
    lock_monitor: Option<JoinHandle<()>>,
    takeover_monitor: Option<JoinHandle<()>>,
}

impl Role {
    /// Create the engine in role `Quiesced`; `set_role(Undefined)` opens the election
    pub fn new(own_node_id: NodeId, config: ElectionConfig, deps: RoleDeps, mailbox: Mailbox) -> Self {
        Self {
            own_node_id,
            role: HaRole::Quiesced,
            known_nodes: BTreeSet::new(),
            peer_controllers: BTreeSet::new(),
            activity: ActivityState::NotActive,
            election_end_time: Instant::ZERO,
            cluster_size: 0,
            config,
            deps,
            mailbox,
            promotion: None,
            lock_monitor: None,
            takeover_monitor: None,
        }
    }

    pub fn role(&self) -> HaRole {
        self.role
    }

    pub fn own_node_id(&self) -> NodeId {
        self.own_node_id
    }

    pub fn known_nodes(&self) -> &BTreeSet<NodeId> {
        &self.known_nodes
    }

    pub fn peer_controllers(&self) -> &BTreeSet<NodeId> {
        &self.peer_controllers
    }

    pub fn activity_state(&self) -> ActivityState {
        self.activity
    }

    pub fn election_end_time(&self) -> Instant {
        self.election_end_time
    }

    pub fn cluster_size(&self) -> u64 {
        self.cluster_size
    }

    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.clone()
    }

    /// Whether both consensus monitors have been started
    pub fn monitors_running(&self) -> bool {
        self.lock_monitor.is_some() && self.takeover_monitor.is_some()
    }

    /// Hand over the most recent promotion task, e.g. to await its outcome
    pub fn take_promotion(&mut self) -> Option<JoinHandle<PromotionOutcome>> {
        self.promotion.take()
    }

    /// Advance the election; returns how long the caller may wait before
    /// polling again, or `None` when no deadline is pending.
    pub async fn poll(&mut self) -> Option<Duration> {
        if self.role != HaRole::Undefined {
            return None;
        }

        let now = self.deps.clock.now();
        if self.election_end_time > now {
            return Some(self.election_end_time.duration_since(now));
        }

        self.election_end_time = Instant::MAX;
        let is_candidate = self.is_candidate();
        let consensus = &self.deps.consensus;

        if consensus.is_enabled() && !is_candidate && !consensus.is_writable().await {
            // Promotion would fail and reboot this node; try later
            trace!("reset timer and try later");
            self.reset_election_timer();
            let now = self.deps.clock.now();
            return Some(self.election_end_time.duration_since(now));
        }

        self.spawn_promotion(is_candidate);
        None
    }

    /// Relaxed promotion lets a node that can see a peer controller promote
    /// itself even when the lock cannot be taken
    pub fn is_candidate(&self) -> bool {
        if self.deps.consensus.is_relaxed_node_promotion_enabled()
            && self.activity == ActivityState::NotActiveSeenPeer
        {
            info!("Relaxed node promotion enabled. This node is a candidate.");
            return true;
        }
        false
    }

    pub fn is_peer_present(&self) -> bool {
        !self.peer_controllers.is_empty()
    }

    fn promoter(&self) -> Promoter {
        Promoter {
            consensus: Arc::clone(&self.deps.consensus),
            rebooter: Arc::clone(&self.deps.rebooter),
            clock: Arc::clone(&self.deps.clock),
            mailbox: self.mailbox.clone(),
        }
    }

    fn spawn_promotion(&mut self, relaxed_mode: bool) {
        let task = self
            .promoter()
            .promote_node(self.cluster_size, relaxed_mode)
            .instrument(election_span(self.own_node_id));

        if let Some(previous) = self.promotion.replace(tokio::spawn(task)) {
            if !previous.is_finished() {
                debug!("Previous promotion attempt is still running");
            }
        }
    }

    /// Acquire the lock for a node that is already active, after the
    /// consensus service was enabled at runtime
    pub fn promote_node_late(&mut self) {
        if self.role != HaRole::Active || !self.deps.consensus.is_enabled() {
            debug!("Late promotion not applicable in role {}", self.role);
            return;
        }
        info!("Acquiring active controller lock for running active controller");
        self.spawn_promotion(true);
    }

    /// Stop a running promotion and give up the lock if it was taken
    async fn abandon_promotion(&mut self) {
        if let Some(task) = self.promotion.take() {
            task.abort();
        }

        match self.deps.consensus.demote_this_node().await {
            Ok(true) => info!("Gave up the active controller lock"),
            Ok(false) => {}
            Err(e) => warn!("Failed to give up the active controller lock: {}", e),
        }
    }

    /// Finish a promotion reported by the promotion task. Only an undefined
    /// node may become ACTIVE this way.
    pub async fn node_promoted(&mut self) {
        if self.role == HaRole::Active {
            debug!("Already ACTIVE, promotion needs no role change");
            return;
        }

        if self.role != HaRole::Undefined {
            info!("Dropping promotion report in role {}", self.role);
            self.abandon_promotion().await;
            return;
        }

        self.execute_pre_active_script().await;

        let old_role = self.role;
        info!("Switched to ACTIVE from {}", old_role);
        self.role = HaRole::Active;
        self.deps.transport.broadcast_role(HaRole::Active);

        self.activity = if self.is_peer_present() {
            ActivityState::ActiveElectedSeenPeer
        } else {
            ActivityState::ActiveElected
        };
        trace!("Set state to {}", self.activity);

        self.start_consensus_monitors();

        if let Err(e) = self.update_registration(HaRole::Active, old_role) {
            error!("Failed to update registration after promotion: {}", e);
        }
    }

    /// Set the role explicitly. A request for ACTIVE from `Undefined` or
    /// `Quiesced` restarts the election instead, since ACTIVE must be won
    /// through the consensus lock.
    pub async fn set_role(&mut self, requested: HaRole) -> WardenResult<()> {
        let old_role = self.role;
        let mut new_role = requested;

        if new_role == HaRole::Active
            && (old_role == HaRole::Undefined || old_role == HaRole::Quiesced)
        {
            info!("Requesting ACTIVE role");
            new_role = HaRole::Undefined;
        }

        if new_role != old_role {
            info!("Role set to {}", new_role);

            if new_role == HaRole::Active {
                self.execute_pre_active_script().await;
                self.activity = ActivityState::ActiveFailover;
                self.start_consensus_monitors();
            }

            self.role = new_role;
            if new_role == HaRole::Undefined {
                self.known_nodes.clear();
                self.reset_election_timer();
            } else {
                self.deps.transport.broadcast_role(new_role);
            }
        }

        self.update_registration(new_role, old_role)
    }

    fn update_registration(&self, new_role: HaRole, old_role: HaRole) -> WardenResult<()> {
        let registered_before = old_role != HaRole::Quiesced;
        let registered_after = new_role != HaRole::Quiesced;

        if registered_before == registered_after {
            return Ok(());
        }

        if registered_after {
            self.deps.transport.register().map_err(|e| {
                error!("Registration for role-based traffic failed: {}", e);
                e
            })
        } else {
            self.deps.transport.unregister().map_err(|e| {
                error!("Unregistration from role-based traffic failed: {}", e);
                e
            })
        }
    }

    /// Concede the election to a peer that is already committed to a role,
    /// or to an undefined peer with a lower node id
    pub async fn set_peer_state(&mut self, peer_role: HaRole, peer_node_id: NodeId) {
        if self.role != HaRole::Undefined {
            return;
        }

        let concede = match peer_role {
            HaRole::Active | HaRole::Standby => true,
            HaRole::Undefined => peer_node_id < self.own_node_id,
            HaRole::Quiesced | HaRole::Quiescing => false,
        };

        if concede {
            self.abandon_promotion().await;
            if let Err(e) = self.set_role(HaRole::Quiesced).await {
                error!("Failed to concede election: {}", e);
            }
            info!(
                "Giving up election against {} with role {}. My role is now {}",
                peer_node_id, peer_role, self.role
            );
        }
    }

    /// Record a discovered peer; a new peer reopens the discovery window
    pub fn add_peer(&mut self, node_id: NodeId) {
        if self.known_nodes.insert(node_id) {
            debug!("New peer {} discovered, restarting election timer", node_id);
            self.reset_election_timer();
        }
    }

    pub fn reset_election_timer(&mut self) {
        self.election_end_time = self
            .deps
            .clock
            .now()
            .saturating_add(self.config.discover_peer_timeout);
    }

    pub fn peer_controller_up(&mut self, node_id: NodeId) {
        if node_id == self.own_node_id || !self.peer_controllers.insert(node_id) {
            return;
        }

        info!("Peer controller {} is up", node_id);
        self.activity = match self.activity {
            ActivityState::NotActive => ActivityState::NotActiveSeenPeer,
            ActivityState::ActiveElected => ActivityState::ActiveElectedSeenPeer,
            other => other,
        };
    }

    pub fn peer_controller_down(&mut self, node_id: NodeId) {
        if !self.peer_controllers.remove(&node_id) {
            return;
        }

        info!("Peer controller {} is down", node_id);
        if self.peer_controllers.is_empty() && self.activity == ActivityState::NotActiveSeenPeer {
            self.activity = ActivityState::NotActive;
        }
    }

    /// Run the pre-active script; failures and timeouts are logged only
    pub async fn execute_pre_active_script(&self) {
        let Some(script) = &self.config.pre_active_script else {
            trace!("No pre-active script configured");
            return;
        };

        let timeout = self.config.pre_active_script_timeout;
        match self.deps.executor.run_with_timeout(script, &[], timeout).await {
            Ok(ProcessOutcome::Exited(Some(0))) => {
                debug!("Pre-active script '{}' completed", script.display())
            }
            Ok(ProcessOutcome::Exited(code)) => warn!(
                "Pre-active script '{}' exited with {:?}",
                script.display(),
                code
            ),
            Ok(ProcessOutcome::TimedOut) => warn!(
                "Pre-active script '{}' timed out after {:?}",
                script.display(),
                timeout
            ),
            Err(e) => warn!("Pre-active script failed: {}", e),
        }
    }

    /// Start one monitor per watched consensus key; repeated calls are no-ops
    pub fn start_consensus_monitors(&mut self) {
        if !self.deps.consensus.is_enabled() {
            return;
        }

        // Watch from the current revisions; any later write is delivered
        if self.lock_monitor.is_none() {
            let key = ConsensusKey::ActiveController;
            let task = self.promoter().monitor(key, self.deps.consensus.revision(key));
            self.lock_monitor = Some(tokio::spawn(task));
        }

        if self.takeover_monitor.is_none() {
            let key = ConsensusKey::TakeoverRequest;
            let task = self.promoter().monitor(key, self.deps.consensus.revision(key));
            self.takeover_monitor = Some(tokio::spawn(task));
        }
    }

    async fn handle_new_active(&mut self) {
        if self.role != HaRole::Active {
            debug!("Active controller changed while {}", self.role);
            return;
        }

        match self.deps.consensus.active_controller().await {
            Ok(Some(owner)) if owner == self.own_node_id => {
                trace!("Still holding the active controller lock")
            }
            Ok(Some(owner)) => {
                error!("Active controller lock taken by {}", owner);
                self.deps
                    .rebooter
                    .reboot("Another controller has been promoted to active")
                    .await;
            }
            Ok(None) => {
                warn!("Active controller lock released, acquiring it again");
                self.promote_node_late();
            }
            Err(e) => warn!("Failed to read active controller: {}", e),
        }
    }

    async fn handle_takeover_request(&mut self, request: String) {
        if self.role != HaRole::Active {
            debug!("Ignoring takeover request '{}' while {}", request, self.role);
            return;
        }

        if self.deps.consensus.self_fence(&request) {
            error!("Takeover request '{}' requires fencing this node", request);
            self.deps
                .rebooter
                .reboot("Fencing self due to takeover request")
                .await;
            return;
        }

        match self.deps.consensus.reject_takeover_request(&request).await {
            Ok(true) => info!("Rejected takeover request '{}'", request),
            Ok(false) => debug!("Takeover request '{}' needs no answer", request),
            Err(e) => warn!("Failed to answer takeover request '{}': {}", request, e),
        }
    }

    /// Process one mailbox message; returns false on shutdown
    pub async fn handle_message(&mut self, message: RdeMessage) -> bool {
        trace!("Received {}", message.kind());

        match message {
            RdeMessage::ActivePromotionSuccess => self.node_promoted().await,
            RdeMessage::NewActive => self.handle_new_active().await,
            RdeMessage::TakeoverRequest(request) => self.handle_takeover_request(request).await,
            RdeMessage::PeerDiscovered(node_id) => {
                if node_id != self.own_node_id {
                    self.add_peer(node_id);
                }
            }
            RdeMessage::PeerState { node_id, role } => self.set_peer_state(role, node_id).await,
            RdeMessage::PeerControllerUp(node_id) => self.peer_controller_up(node_id),
            RdeMessage::PeerControllerDown(node_id) => self.peer_controller_down(node_id),
            RdeMessage::SetRole(role) => {
                if let Err(e) = self.set_role(role).await {
                    error!("Failed to set role {}: {}", role, e);
                }
            }
            RdeMessage::ClusterSize(size) => self.cluster_size = size,
            RdeMessage::Shutdown => return false,
        }
        true
    }

    /// Serve the mailbox until shutdown, waking up for election deadlines
    pub async fn run(mut self, mut mailbox: MailboxReceiver) {
        let span = election_span(self.own_node_id);

        async move {
            info!("Election engine started in role {}", self.role);

            loop {
                let wait = self.poll().await;
                let clock = Arc::clone(&self.deps.clock);

                tokio::select! {
                    message = mailbox.recv() => match message {
                        Some(message) => {
                            if !self.handle_message(message).await {
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = async {
                        match wait {
                            Some(duration) => clock.sleep(duration).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {}
                }
            }

            info!("Election engine stopped in role {}", self.role);
        }
        .instrument(span)
        .await
    }
}

impl Drop for Role {
    fn drop(&mut self) {
        if let Some(task) = self.promotion.take() {
            task.abort();
        }
        for task in [self.lock_monitor.take(), self.takeover_monitor.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }
}
