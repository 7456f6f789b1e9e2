//! Consensus service contract
//!
//! The consensus service is an external key/value store holding the
//! active-controller lock. It guarantees that at most one system controller
//! is active cluster-wide; the election engine only ever becomes active
//! after (or, in relaxed mode, while) acquiring that lock.

use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::types::NodeId;

pub mod memory;

pub use memory::{MemoryConsensus, MemoryStore};

/// Failures reported by the consensus service
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The key already exists; for the lock this means another node is active
    #[error("key already exists")]
    AlreadyExists,

    #[error("try again")]
    TryAgain,

    #[error("consensus service unavailable")]
    Unavailable,

    #[error("consensus operation timed out")]
    Timeout,

    #[error("consensus service is disabled")]
    Disabled,
}

/// Keys of the consensus store watched by the election engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsensusKey {
    /// Node id of the controller holding the active lock
    ActiveController,
    /// Pending takeover request against the lock holder
    TakeoverRequest,
}

impl ConsensusKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusKey::ActiveController => "opensaf_consensus_lock",
            ConsensusKey::TakeoverRequest => "takeover_request",
        }
    }
}

impl fmt::Display for ConsensusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in the change history of one consensus key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Revision(pub u64);

/// Progress of a takeover request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverState {
    New,
    /// The lock holder is alive and keeps the lock
    Rejected,
    Fence,
}

impl TakeoverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TakeoverState::New => "NEW",
            TakeoverState::Rejected => "REJECTED",
            TakeoverState::Fence => "FENCE",
        }
    }
}

/// A takeover request as stored in the consensus service:
/// `"<current owner> <proposed owner> <proposed partition size> <state>"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TakeoverRequest {
    pub current_owner: NodeId,
    pub proposed_owner: NodeId,
    pub proposed_cluster_size: u64,
    pub state: TakeoverState,
}

impl TakeoverRequest {
    pub fn new(current_owner: NodeId, proposed_owner: NodeId, proposed_cluster_size: u64) -> Self {
        Self {
            current_owner,
            proposed_owner,
            proposed_cluster_size,
            state: TakeoverState::New,
        }
    }

    pub fn with_state(mut self, state: TakeoverState) -> Self {
        self.state = state;
        self
    }
}

impl fmt::Display for TakeoverRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.current_owner.as_u32(),
            self.proposed_owner.as_u32(),
            self.proposed_cluster_size,
            self.state.as_str()
        )
    }
}

/// Error returned when a takeover request string is malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed takeover request '{0}'")]
pub struct MalformedTakeoverRequest(pub String);

impl FromStr for TakeoverRequest {
    type Err = MalformedTakeoverRequest;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || MalformedTakeoverRequest(s.to_string());
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let [current, proposed, size, state] = tokens.as_slice() else {
            return Err(malformed());
        };

        let state = match *state {
            "NEW" => TakeoverState::New,
            "REJECTED" => TakeoverState::Rejected,
            "FENCE" => TakeoverState::Fence,
            _ => return Err(malformed()),
        };

        Ok(Self {
            current_owner: current.parse().map_err(|_| malformed())?,
            proposed_owner: proposed.parse().map_err(|_| malformed())?,
            proposed_cluster_size: size.parse().map_err(|_| malformed())?,
            state,
        })
    }
}

/// Client of the consensus service used by one controller node
#[async_trait]
pub trait ConsensusClient: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn is_relaxed_node_promotion_enabled(&self) -> bool;

    fn is_remote_fencing_enabled(&self) -> bool;

    /// How long the service takes at most to fence a stalled lock holder
    fn takeover_valid_time(&self) -> Duration;

    fn prioritise_partition_size(&self) -> bool;

    fn prioritise_partition_size_wait_time(&self) -> Duration;

    /// Whether the key/value store currently accepts writes
    async fn is_writable(&self) -> bool;

    /// Try to take the active-controller lock for this node.
    ///
    /// Returns [`ConsensusError::AlreadyExists`] when another node holds it.
    async fn promote_this_node(
        &self,
        graceful_takeover: bool,
        cluster_size: u64,
    ) -> Result<(), ConsensusError>;

    /// Node currently holding the active-controller lock
    async fn active_controller(&self) -> Result<Option<NodeId>, ConsensusError>;

    /// Read the raw takeover request value
    async fn read_takeover_request(&self) -> Result<String, ConsensusError>;

    /// Whether `request` obliges this node to fence itself
    fn self_fence(&self, request: &str) -> bool;

    /// Answer a `NEW` takeover request against this node with `REJECTED`.
    ///
    /// Returns `Ok(false)` when `request` is not a pending request against
    /// this node or was replaced in the meantime.
    async fn reject_takeover_request(&self, request: &str) -> Result<bool, ConsensusError>;

    /// Release the active-controller lock if this node holds it
    async fn demote_this_node(&self) -> Result<bool, ConsensusError>;

    /// Current revision of `key`, the starting point of a watch
    fn revision(&self, key: ConsensusKey) -> Revision;

    /// Wait until `key` changes after `since`; returns the new revision and
    /// the latest value (empty when the key was removed)
    async fn watch(
        &self,
        key: ConsensusKey,
        since: Revision,
    ) -> Result<(Revision, String), ConsensusError>;
}
