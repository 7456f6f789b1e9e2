use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use warden_core::{
    abstractions::{Clock, CommandRebooter, ProcessExecutor, SystemClock, TokioProcessExecutor},
    config::WardenConfig,
    consensus::{ConsensusClient, MemoryConsensus},
    error::WardenResult,
    failover::{Director, DirectorEvent},
    role::{channel, Mailbox, RdeMessage, Role, RoleDeps},
    HaRole, WardenError,
};

use crate::collaborators::{LoggingServices, LoggingTransport};

/// Capacity of the director's event channel
const DIRECTOR_CHANNEL_CAPACITY: usize = 256;

/// Wires the election engine and the failover director of one controller
///
/// ```text
///   peer / admin events          MDS events, checkpoints
///          │                              │
///          ▼                              ▼
///   ┌──────────────┐  role broadcast ┌──────────────┐
///   │ Role (task)  │ ──────────────► │ Director     │
///   │  + promotion │                 │  (task)      │
///   │  + monitors  │                 └──────────────┘
///   └──────────────┘
/// ```
pub struct WardenOrchestrator {
    config: WardenConfig,
    transport: Option<Arc<LoggingTransport>>,
    role_mailbox: Option<Mailbox>,
    director_events: Option<mpsc::Sender<DirectorEvent>>,
    role_task: Option<JoinHandle<()>>,
    director_task: Option<JoinHandle<()>>,
}

impl WardenOrchestrator {
    /// Create an orchestrator for a validated configuration
    pub fn new(config: WardenConfig) -> WardenResult<Self> {
        config.validate()?;
        tracing::info!("Creating Warden orchestrator for node {}", config.node_id());

        Ok(Self {
            config,
            transport: None,
            role_mailbox: None,
            director_events: None,
            role_task: None,
            director_task: None,
        })
    }

    /// Spawn the director and the election engine, and open the election
    pub async fn start(&mut self) -> WardenResult<()> {
        if self.role_task.is_some() {
            return Err(WardenError::Internal {
                message: "orchestrator already started".to_string(),
            });
        }

        let node_id = self.config.node_id();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
        let executor: Arc<dyn ProcessExecutor> = Arc::new(TokioProcessExecutor::new());
        let consensus: Arc<dyn ConsensusClient> = Arc::new(MemoryConsensus::standalone(
            node_id,
            self.config.consensus.clone(),
        ));

        let (director_tx, director_rx) = mpsc::channel(DIRECTOR_CHANNEL_CAPACITY);
        let director = Director::new(
            self.config.failover.clone(),
            self.config.node.peer_director,
            Arc::clone(&clock),
            Box::new(LoggingServices),
            Arc::clone(&consensus),
        );
        self.director_task = Some(tokio::spawn(director.run(director_rx)));

        let transport = Arc::new(LoggingTransport::new(director_tx.clone()));
        let rebooter = Arc::new(CommandRebooter::new(
            Arc::clone(&executor),
            self.config.node.reboot_command.clone(),
            self.config.node.reboot_args.clone(),
        ));
        let deps = RoleDeps {
            consensus,
            transport: transport.clone(),
            executor,
            rebooter,
            clock,
        };

        let (mailbox, mailbox_rx) = channel();
        let role = Role::new(node_id, self.config.election.clone(), deps, mailbox.clone());
        self.role_task = Some(tokio::spawn(role.run(mailbox_rx)));

        mailbox.send(RdeMessage::SetRole(HaRole::Undefined))?;

        self.transport = Some(transport);
        self.role_mailbox = Some(mailbox);
        self.director_events = Some(director_tx);

        tracing::info!("Warden node {} started", node_id);
        Ok(())
    }

    /// Shut both engines down and wait for them to finish
    pub async fn stop(&mut self) -> WardenResult<()> {
        tracing::info!("Stopping Warden orchestrator");

        if let Some(mailbox) = self.role_mailbox.take() {
            if let Err(e) = mailbox.send(RdeMessage::Shutdown) {
                tracing::debug!("Election engine already gone: {}", e);
            }
        }
        if let Some(events) = self.director_events.take() {
            if events.send(DirectorEvent::Shutdown).await.is_err() {
                tracing::debug!("Director already gone");
            }
        }

        for task in [self.role_task.take(), self.director_task.take()]
            .into_iter()
            .flatten()
        {
            task.await.map_err(|e| WardenError::Internal {
                message: format!("Task failed during shutdown: {e}"),
            })?;
        }

        self.transport = None;
        tracing::info!("Warden orchestrator stopped");
        Ok(())
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    /// Mailbox of the election engine, for peer and administrative events
    pub fn role_mailbox(&self) -> Option<Mailbox> {
        self.role_mailbox.clone()
    }

    /// Event channel of the director, for MDS events and checkpoints
    pub fn director_events(&self) -> Option<mpsc::Sender<DirectorEvent>> {
        self.director_events.clone()
    }

    /// The role this controller last announced
    pub fn current_role(&self) -> Option<HaRole> {
        self.transport.as_ref().and_then(|t| t.last_role())
    }
}

impl Drop for WardenOrchestrator {
    fn drop(&mut self) {
        for task in [self.role_task.take(), self.director_task.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        tracing::debug!("WardenOrchestrator dropped");
    }
}
