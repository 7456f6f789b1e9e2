//! Configuration for the Warden controller daemon
//!
//! Configuration is loaded from TOML, may be overridden from the environment,
//! and is validated before any component is constructed from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{WardenError, WardenResult};
use crate::types::NodeId;

pub mod consensus;
pub mod defaults;
pub mod election;
pub mod failover;

pub use consensus::ConsensusConfig;
pub use defaults::*;
pub use election::ElectionConfig;
pub use failover::FailoverConfig;

/// Environment lookup used when applying overrides
pub(crate) type EnvLookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Node identification
    pub node: NodeConfig,

    /// Controller election
    pub election: ElectionConfig,

    /// Node failover timing
    pub failover: FailoverConfig,

    /// Consensus service policy
    pub consensus: ConsensusConfig,

    /// Logging
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Cluster node id of this controller
    pub id: u32,

    /// Node id of the other system controller, if any
    pub peer_director: Option<NodeId>,

    /// Command used to reboot this node
    pub reboot_command: PathBuf,

    /// Arguments passed to the reboot command
    pub reboot_args: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: 0,
            peer_director: None,
            reboot_command: PathBuf::from(DEFAULT_REBOOT_COMMAND),
            reboot_args: vec!["-f".to_string()],
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Full,
    Compact,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when RUST_LOG is not set
    pub level: String,

    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::Full,
        }
    }
}

impl WardenConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> WardenResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> WardenResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Render the configuration as TOML
    pub fn to_toml_string(&self) -> WardenResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> WardenResult<()> {
        self.apply_env_from(&|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub fn apply_env_from(&mut self, env: &EnvLookup<'_>) -> WardenResult<()> {
        if let Some(val) = env(ENV_NODE_ID) {
            self.node.id = parse_u32(ENV_NODE_ID, &val)?;
        }

        if let Some(val) = env(ENV_PEER_DIRECTOR) {
            self.node.peer_director = Some(NodeId(parse_u32(ENV_PEER_DIRECTOR, &val)?));
        }

        if let Some(val) = env(ENV_LOG_LEVEL) {
            self.logging.level = val;
        }

        self.election.apply_env(env)?;
        self.failover.apply_env(env)?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> WardenResult<()> {
        if self.node.id == 0 {
            return Err(WardenError::config("node.id must be non-zero"));
        }

        if self.node.peer_director == Some(self.node_id()) {
            return Err(WardenError::config(
                "node.peer_director must differ from node.id",
            ));
        }

        self.election.validate()?;
        self.failover.validate()?;
        self.consensus.validate()?;

        Ok(())
    }

    pub fn node_id(&self) -> NodeId {
        NodeId(self.node.id)
    }

    /// Create a test configuration with short timers
    pub fn test() -> Self {
        let mut config = Self::default();
        config.node.id = 0x2010f;
        config.election.discover_peer_timeout = Duration::from_millis(100);
        config.election.pre_active_script = None;
        config.failover.node_failover_delay = Duration::from_secs(1);
        config.failover.node_failover_node_wait = Duration::from_secs(2);
        config
    }
}

/// Builder for WardenConfig
pub struct WardenConfigBuilder {
    config: WardenConfig,
}

impl WardenConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: WardenConfig::default(),
        }
    }

    pub fn node_id(mut self, id: u32) -> Self {
        self.config.node.id = id;
        self
    }

    pub fn peer_director(mut self, id: u32) -> Self {
        self.config.node.peer_director = Some(NodeId(id));
        self
    }

    pub fn election(mut self, election: ElectionConfig) -> Self {
        self.config.election = election;
        self
    }

    pub fn failover(mut self, failover: FailoverConfig) -> Self {
        self.config.failover = failover;
        self
    }

    pub fn consensus(mut self, consensus: ConsensusConfig) -> Self {
        self.config.consensus = consensus;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> WardenResult<WardenConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for WardenConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_u32(key: &str, value: &str) -> WardenResult<u32> {
    let trimmed = value.trim();
    let parsed = match trimmed.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse(),
    };
    parsed.map_err(|_| WardenError::config(format!("Invalid {key}: '{value}'")))
}

pub(crate) fn parse_duration_ms(key: &str, value: &str) -> WardenResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| WardenError::config(format!("Invalid {key}: '{value}'")))
}

pub(crate) fn parse_duration_secs(key: &str, value: &str) -> WardenResult<Duration> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| WardenError::config(format!("Invalid {key}: '{value}'")))
}
