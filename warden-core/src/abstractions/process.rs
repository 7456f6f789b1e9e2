//! Process execution abstractions for testability
//!
//! External hooks (the pre-active script, the reboot command) are run
//! through this trait so tests never spawn system processes.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{WardenError, WardenResult};

/// How a bounded process execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The process exited; `None` when it was killed by a signal
    Exited(Option<i32>),
    /// The process did not finish within the timeout and was killed
    TimedOut,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ProcessOutcome::Exited(Some(0)))
    }
}

/// Abstraction for process execution
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run `program` with `args`, waiting at most `timeout` for it to exit
    async fn run_with_timeout(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> WardenResult<ProcessOutcome>;
}

/// Production process executor
pub struct TokioProcessExecutor;

impl TokioProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TokioProcessExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessExecutor for TokioProcessExecutor {
    async fn run_with_timeout(
        &self,
        program: &Path,
        args: &[String],
        timeout: Duration,
    ) -> WardenResult<ProcessOutcome> {
        debug!("Executing '{}' with timeout {:?}", program.display(), timeout);

        let mut child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WardenError::Process {
                command: program.display().to_string(),
                message: e.to_string(),
            })?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Ok(ProcessOutcome::Exited(status.code())),
            Ok(Err(e)) => Err(WardenError::Process {
                command: program.display().to_string(),
                message: e.to_string(),
            }),
            Err(_) => {
                warn!(
                    "'{}' did not finish within {:?}, killing it",
                    program.display(),
                    timeout
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill '{}': {}", program.display(), e);
                }
                Ok(ProcessOutcome::TimedOut)
            }
        }
    }
}
