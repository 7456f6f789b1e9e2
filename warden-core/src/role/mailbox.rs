//! Mailbox of the election engine
//!
//! Background tasks (promotion, consensus monitors) and the outside world
//! talk to [`Role`](super::Role) only through this channel, so every role
//! mutation happens on the task that owns the `Role`.

use tokio::sync::mpsc;

use crate::error::{WardenError, WardenResult};
use crate::types::{HaRole, NodeId};

/// Messages processed by the election engine's main loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RdeMessage {
    /// The promotion task acquired (or, in relaxed mode, bypassed) the lock
    ActivePromotionSuccess,
    /// The active-controller lock changed owner
    NewActive,
    /// A takeover request was filed against this node's lock
    TakeoverRequest(String),
    /// A peer controller was discovered
    PeerDiscovered(NodeId),
    /// A peer controller reported its role
    PeerState { node_id: NodeId, role: HaRole },
    PeerControllerUp(NodeId),
    PeerControllerDown(NodeId),
    /// Administrative role change, e.g. a switchover
    SetRole(HaRole),
    /// Number of cluster members currently visible from this node
    ClusterSize(u64),
    Shutdown,
}

impl RdeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            RdeMessage::ActivePromotionSuccess => "ActivePromotionSuccess",
            RdeMessage::NewActive => "NewActive",
            RdeMessage::TakeoverRequest(_) => "TakeoverRequest",
            RdeMessage::PeerDiscovered(_) => "PeerDiscovered",
            RdeMessage::PeerState { .. } => "PeerState",
            RdeMessage::PeerControllerUp(_) => "PeerControllerUp",
            RdeMessage::PeerControllerDown(_) => "PeerControllerDown",
            RdeMessage::SetRole(_) => "SetRole",
            RdeMessage::ClusterSize(_) => "ClusterSize",
            RdeMessage::Shutdown => "Shutdown",
        }
    }
}

pub type MailboxReceiver = mpsc::UnboundedReceiver<RdeMessage>;

/// Sending half of the election engine's mailbox
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<RdeMessage>,
}

impl Mailbox {
    pub fn send(&self, message: RdeMessage) -> WardenResult<()> {
        let kind = message.kind();
        self.tx
            .send(message)
            .map_err(|_| WardenError::MailboxClosed {
                message_type: kind.to_string(),
            })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub fn channel() -> (Mailbox, MailboxReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Mailbox { tx }, rx)
}
