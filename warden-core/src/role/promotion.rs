//! Background work of the election engine
//!
//! Lock acquisition and consensus key monitoring may block for seconds, so
//! they run as tokio tasks. Their only way to affect the role is a message
//! posted to the [`Mailbox`].

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use super::mailbox::{Mailbox, RdeMessage};
use crate::abstractions::{Clock, Rebooter};
use crate::consensus::{ConsensusClient, ConsensusError, ConsensusKey, Revision};

/// Pause between lock attempts after a relaxed-mode promotion
pub const PROMOTION_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Attempts to read a takeover request the watch delivered empty
pub const TAKEOVER_READ_RETRIES: usize = 5;

/// Pause after a failed watch before watching again
const WATCH_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How a promotion attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// Another controller holds the lock; this node stays inactive
    StoodDown,
    /// The lock was acquired on the first attempt
    Promoted,
    /// Promoted without the lock, which was acquired by a later retry
    PromotedAfterRetry,
    /// The node was rebooted to avoid split brain
    Rebooted,
}

/// Collaborators of the promotion and monitor tasks
#[derive(Clone)]
pub struct Promoter {
    pub consensus: Arc<dyn ConsensusClient>,
    pub rebooter: Arc<dyn Rebooter>,
    pub clock: Arc<dyn Clock>,
    pub mailbox: Mailbox,
}

impl Promoter {
    /// Try to become the active controller.
    ///
    /// In strict mode any lock failure other than "already exists" reboots
    /// the node. In relaxed mode the node is promoted anyway and the lock is
    /// retried until it is acquired, or until another node turns out to hold
    /// it, which reboots the node.
    pub async fn promote_node(self, cluster_size: u64, relaxed_mode: bool) -> PromotionOutcome {
        trace!("Promoting node, cluster size {}, relaxed {}", cluster_size, relaxed_mode);

        let promotion_pending = match self.consensus.promote_this_node(true, cluster_size).await {
            Ok(()) => false,
            Err(ConsensusError::AlreadyExists) => {
                warn!("Another controller is already active");
                return PromotionOutcome::StoodDown;
            }
            Err(e) if relaxed_mode => {
                warn!("Unable to set active controller in consensus service: {}", e);
                warn!("Will become active anyway");
                true
            }
            Err(e) => {
                error!("Unable to set active controller in consensus service: {}", e);
                self.rebooter
                    .reboot("Unable to set active controller in consensus service")
                    .await;
                return PromotionOutcome::Rebooted;
            }
        };

        if let Err(e) = self.mailbox.send(RdeMessage::ActivePromotionSuccess) {
            error!("Failed to report promotion: {}", e);
        }

        if !promotion_pending {
            return PromotionOutcome::Promoted;
        }

        // Promoted without the lock; keep trying the consensus service
        loop {
            match self.consensus.promote_this_node(true, cluster_size).await {
                Ok(()) => {
                    info!("Successfully set active controller in consensus service");
                    return PromotionOutcome::PromotedAfterRetry;
                }
                Err(ConsensusError::AlreadyExists) => {
                    error!("Unable to set active controller in consensus service");
                    self.rebooter
                        .reboot("Unable to set active controller in consensus service")
                        .await;
                    return PromotionOutcome::Rebooted;
                }
                Err(e) => debug!("Lock retry failed: {}", e),
            }
            self.clock.sleep(PROMOTION_RETRY_INTERVAL).await;
        }
    }

    /// Translate a change of a watched key into a mailbox message
    pub async fn monitor_callback(&self, key: ConsensusKey, new_value: String) -> RdeMessage {
        match key {
            ConsensusKey::TakeoverRequest => {
                let request = if new_value.is_empty() {
                    // Some stores do not deliver the new value with the change
                    trace!("Empty takeover request from callback. Try reading it");
                    self.read_takeover_request().await
                } else {
                    new_value
                };

                trace!("Sending takeover request '{}' to main task", request);
                if !self.consensus.self_fence(&request) && self.consensus.prioritise_partition_size()
                {
                    // Let topology changes reach the main task first
                    self.clock
                        .sleep(self.consensus.prioritise_partition_size_wait_time())
                        .await;
                }
                RdeMessage::TakeoverRequest(request)
            }
            ConsensusKey::ActiveController => RdeMessage::NewActive,
        }
    }

    async fn read_takeover_request(&self) -> String {
        for attempt in 1..=TAKEOVER_READ_RETRIES {
            match self.consensus.read_takeover_request().await {
                Ok(request) => return request,
                Err(e) => trace!("Reading takeover request failed (attempt {}): {}", attempt, e),
            }
        }
        String::new()
    }

    /// Forward every change of `key` after `since` to the mailbox for as
    /// long as it is open. Changes made while a callback runs are picked up
    /// by the next watch.
    pub async fn monitor(self, key: ConsensusKey, mut since: Revision) {
        debug!("Monitoring consensus key '{}' from {:?}", key, since);

        loop {
            match self.consensus.watch(key, since).await {
                Ok((revision, value)) => {
                    since = revision;
                    let message = self.monitor_callback(key, value).await;
                    if self.mailbox.send(message).is_err() {
                        debug!("Mailbox closed, stop monitoring '{}'", key);
                        return;
                    }
                }
                Err(ConsensusError::Disabled) => {
                    debug!("Consensus service disabled, stop monitoring '{}'", key);
                    return;
                }
                Err(e) => {
                    warn!("Monitoring '{}' failed: {}", key, e);
                    self.clock.sleep(WATCH_RETRY_INTERVAL).await;
                }
            }
        }
    }
}
