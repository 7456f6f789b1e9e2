//! Default configuration values for Warden
//!
//! This module centralizes all default values to make them easy to find and modify.

use std::time::Duration;

// Election defaults
pub const DEFAULT_DISCOVER_PEER_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_PRE_ACTIVE_SCRIPT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_PRE_ACTIVE_SCRIPT: &str = "/usr/local/lib/warden/sc_active";

// Node failover defaults
pub const DEFAULT_NODE_FAILOVER_DELAY_SECS: u64 = 10;
pub const DEFAULT_NODE_FAILOVER_NODE_WAIT_SECS: u64 = 15;

// Consensus defaults
pub const DEFAULT_TAKEOVER_VALID_TIME_SECS: u64 = 20;
pub const DEFAULT_PRIORITISE_PARTITION_SIZE_WAIT_SECS: u64 = 4;

// Node defaults
pub const DEFAULT_REBOOT_COMMAND: &str = "/sbin/reboot";
pub const DEFAULT_LOG_LEVEL: &str = "info";

// Environment variable names
pub const ENV_DISCOVER_PEER_TIMEOUT: &str = "RDE_DISCOVER_PEER_TIMEOUT";
pub const ENV_PRE_ACTIVE_SCRIPT_TIMEOUT: &str = "RDE_PRE_ACTIVE_SCRIPT_TIMEOUT";
pub const ENV_NODE_ID: &str = "WARDEN_NODE_ID";
pub const ENV_PEER_DIRECTOR: &str = "WARDEN_PEER_DIRECTOR";
pub const ENV_NODE_FAILOVER_DELAY: &str = "WARDEN_NODE_FAILOVER_DELAY";
pub const ENV_NODE_FAILOVER_NODE_WAIT: &str = "WARDEN_NODE_FAILOVER_NODE_WAIT";
pub const ENV_LOG_LEVEL: &str = "WARDEN_LOG_LEVEL";

pub fn duration_ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

pub fn duration_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}
