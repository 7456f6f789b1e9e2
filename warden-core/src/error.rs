use thiserror::Error;

use crate::consensus::ConsensusError;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Consensus service error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Transport registration '{operation}' failed: {message}")]
    Registration { operation: String, message: String },

    #[error("Process '{command}' failed: {message}")]
    Process { command: String, message: String },

    #[error("Mailbox closed while sending {message_type}")]
    MailboxClosed { message_type: String },

    #[error("Invalid failover state value {value}")]
    InvalidFailoverState { value: u32 },

    #[error("Invalid HA role value {value}")]
    InvalidRole { value: u32 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, WardenError>;
pub type WardenResult<T> = std::result::Result<T, WardenError>;

impl WardenError {
    pub fn config(message: impl Into<String>) -> Self {
        WardenError::Configuration {
            message: message.into(),
        }
    }

    pub fn registration(operation: impl Into<String>, message: impl Into<String>) -> Self {
        WardenError::Registration {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
