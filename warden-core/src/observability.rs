//! Logging setup and span helpers
//!
//! Operators observe the failover and election engines exclusively through
//! logs, so every decision is logged with the node it concerns.

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{WardenError, WardenResult};
use crate::types::NodeId;

/// Initialize tracing from the logging configuration; `RUST_LOG` wins when set
pub fn init_tracing(config: &LoggingConfig) -> WardenResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "warden={level},warden_core={level}",
            level = config.level
        ))
        .map_err(|e| WardenError::config(format!("Invalid log level '{}': {}", config.level, e)))?,
    };

    let registry = Registry::default().with(env_filter);

    let result = match config.format {
        LogFormat::Full => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
    };

    result.map_err(|e| WardenError::Internal {
        message: format!("Failed to install tracing subscriber: {e}"),
    })
}

/// Create a span for node failover handling
#[inline]
pub fn failover_span(node_id: NodeId) -> Span {
    tracing::debug_span!("failover", node_id = %node_id)
}

/// Create a span for controller election
#[inline]
pub fn election_span(own_node_id: NodeId) -> Span {
    tracing::info_span!("election", node_id = %own_node_id)
}
