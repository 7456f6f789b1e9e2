pub mod collaborators;
pub mod orchestrator;

pub use orchestrator::WardenOrchestrator;

// Re-export commonly used types
pub use warden_core::{
    config::WardenConfig,
    error::{WardenError, WardenResult},
    HaRole, NodeId,
};

use std::path::Path;

/// Command line overrides applied on top of file and environment settings
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigOverrides {
    pub node_id: Option<NodeId>,
    pub peer_director: Option<NodeId>,
}

/// Build the effective configuration: file (or defaults), then environment,
/// then command line
pub fn load_config(path: Option<&Path>, overrides: ConfigOverrides) -> WardenResult<WardenConfig> {
    let mut config = match path {
        Some(path) => WardenConfig::from_file(path)?,
        None => WardenConfig::default(),
    };

    config.apply_env_overrides()?;

    if let Some(node_id) = overrides.node_id {
        config.node.id = node_id.as_u32();
    }
    if let Some(peer) = overrides.peer_director {
        config.node.peer_director = Some(peer);
    }

    Ok(config)
}
