//! Node failover timing configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_secs, EnvLookup};
use crate::error::{WardenError, WardenResult};

/// Node failover timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Time a lost node is given to reappear before its workload is failed over
    #[serde(with = "humantime_serde")]
    pub node_failover_delay: Duration,

    /// Time a reappearing node is given to report node up
    #[serde(with = "humantime_serde")]
    pub node_failover_node_wait: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            node_failover_delay: duration_secs(DEFAULT_NODE_FAILOVER_DELAY_SECS),
            node_failover_node_wait: duration_secs(DEFAULT_NODE_FAILOVER_NODE_WAIT_SECS),
        }
    }
}

impl FailoverConfig {
    pub(crate) fn apply_env(&mut self, env: &EnvLookup<'_>) -> WardenResult<()> {
        if let Some(val) = env(ENV_NODE_FAILOVER_DELAY) {
            self.node_failover_delay = parse_duration_secs(ENV_NODE_FAILOVER_DELAY, &val)?;
        }

        if let Some(val) = env(ENV_NODE_FAILOVER_NODE_WAIT) {
            self.node_failover_node_wait = parse_duration_secs(ENV_NODE_FAILOVER_NODE_WAIT, &val)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.node_failover_node_wait.is_zero() {
            return Err(WardenError::config(
                "failover.node_failover_node_wait must be non-zero",
            ));
        }
        Ok(())
    }
}
