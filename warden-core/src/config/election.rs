//! Controller election configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::*;
use super::{parse_duration_ms, EnvLookup};
use crate::error::{WardenError, WardenResult};

/// Controller election configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// How long to wait for peer controllers before trying to become active
    #[serde(with = "humantime_serde")]
    pub discover_peer_timeout: Duration,

    /// Script executed before this node is advertised as active
    pub pre_active_script: Option<PathBuf>,

    /// Upper bound on the pre-active script run time
    #[serde(with = "humantime_serde")]
    pub pre_active_script_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            discover_peer_timeout: duration_ms(DEFAULT_DISCOVER_PEER_TIMEOUT_MS),
            pre_active_script: Some(PathBuf::from(DEFAULT_PRE_ACTIVE_SCRIPT)),
            pre_active_script_timeout: duration_ms(DEFAULT_PRE_ACTIVE_SCRIPT_TIMEOUT_MS),
        }
    }
}

impl ElectionConfig {
    pub(crate) fn apply_env(&mut self, env: &EnvLookup<'_>) -> WardenResult<()> {
        if let Some(val) = env(ENV_DISCOVER_PEER_TIMEOUT) {
            self.discover_peer_timeout = parse_duration_ms(ENV_DISCOVER_PEER_TIMEOUT, &val)?;
        }

        if let Some(val) = env(ENV_PRE_ACTIVE_SCRIPT_TIMEOUT) {
            self.pre_active_script_timeout =
                parse_duration_ms(ENV_PRE_ACTIVE_SCRIPT_TIMEOUT, &val)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> WardenResult<()> {
        if self.discover_peer_timeout.is_zero() {
            return Err(WardenError::config("election.discover_peer_timeout must be non-zero"));
        }

        if self.pre_active_script_timeout.is_zero() {
            return Err(WardenError::config(
                "election.pre_active_script_timeout must be non-zero",
            ));
        }

        Ok(())
    }
}
