//! Node reboot abstraction
//!
//! A reboot is the last line of defence against split brain: once called,
//! this node must stop acting as a controller.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use super::process::ProcessExecutor;

/// Reboots the local node
#[async_trait]
pub trait Rebooter: Send + Sync {
    /// Reboot this node, logging `reason`.
    ///
    /// Production implementations never return: the process either goes
    /// down with the node or is aborted. Test doubles may record the call
    /// and return.
    async fn reboot(&self, reason: &str);
}

/// Called with the reboot reason when the reboot command did not succeed
pub type RebootFallback = Box<dyn Fn(&str) + Send + Sync>;

fn abort_process(reason: &str) {
    error!("Reboot failed, aborting the process: {}", reason);
    std::process::abort();
}

/// Reboots by running the configured reboot command, aborting the process
/// if the command fails
pub struct CommandRebooter {
    executor: Arc<dyn ProcessExecutor>,
    command: PathBuf,
    args: Vec<String>,
    fallback: RebootFallback,
}

impl CommandRebooter {
    const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(executor: Arc<dyn ProcessExecutor>, command: PathBuf, args: Vec<String>) -> Self {
        Self {
            executor,
            command,
            args,
            fallback: Box::new(abort_process),
        }
    }

    /// Replace the process abort run after a failed reboot command
    pub fn with_fallback(mut self, fallback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.fallback = Box::new(fallback);
        self
    }
}

#[async_trait]
impl Rebooter for CommandRebooter {
    async fn reboot(&self, reason: &str) {
        error!("Rebooting node: {}", reason);

        let succeeded = match self
            .executor
            .run_with_timeout(&self.command, &self.args, Self::COMMAND_TIMEOUT)
            .await
        {
            Ok(outcome) if outcome.success() => true,
            Ok(outcome) => {
                error!(
                    "Reboot command '{}' ended with {:?}",
                    self.command.display(),
                    outcome
                );
                false
            }
            Err(e) => {
                error!("Reboot command failed: {}", e);
                false
            }
        };

        if !succeeded {
            (self.fallback)(reason);
        }

        // The node is going down; nothing after a reboot may run
        std::future::pending::<()>().await;
    }
}
