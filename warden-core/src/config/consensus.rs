//! Consensus service policy configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use crate::error::{WardenError, WardenResult};

/// Policy knobs of the consensus (split-brain avoidance) service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Whether the active controller must hold the consensus lock
    pub enabled: bool,

    /// Allow promotion without the lock when a peer controller is visible
    pub relaxed_node_promotion: bool,

    /// Fence lost nodes immediately instead of waiting for them to reappear
    pub remote_fencing: bool,

    /// How long a takeover request stays valid
    #[serde(with = "humantime_serde")]
    pub takeover_valid_time: Duration,

    /// Prefer the larger network partition when resolving takeovers
    pub prioritise_partition_size: bool,

    /// Grace period for membership to settle before forwarding a takeover request
    #[serde(with = "humantime_serde")]
    pub prioritise_partition_size_wait_time: Duration,

    /// Whether the key/value store currently accepts writes
    pub writable: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            relaxed_node_promotion: false,
            remote_fencing: false,
            takeover_valid_time: duration_secs(DEFAULT_TAKEOVER_VALID_TIME_SECS),
            prioritise_partition_size: false,
            prioritise_partition_size_wait_time: duration_secs(
                DEFAULT_PRIORITISE_PARTITION_SIZE_WAIT_SECS,
            ),
            writable: true,
        }
    }
}

impl ConsensusConfig {
    pub fn validate(&self) -> WardenResult<()> {
        if self.enabled && self.takeover_valid_time.is_zero() {
            return Err(WardenError::config(
                "consensus.takeover_valid_time must be non-zero when consensus is enabled",
            ));
        }
        Ok(())
    }
}
