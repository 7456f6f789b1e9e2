//! In-memory consensus backend
//!
//! A single-process key/value arbitrator with the same primitive operations
//! as the TCP arbitrator plugin (create, set, get, compare-and-set, delete).
//! Several [`MemoryConsensus`] clients may share one [`MemoryStore`], which is
//! how two controllers contend for the active lock in tests and in a
//! standalone daemon.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use super::{
    ConsensusClient, ConsensusError, ConsensusKey, Revision, TakeoverRequest, TakeoverState,
};
use crate::config::ConsensusConfig;
use crate::types::NodeId;

#[derive(Debug, Default)]
struct Entry {
    value: Option<String>,
    version: u64,
}

/// Shared key/value store with change notification
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    changed: Notify,
    available: AtomicBool,
    writable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            changed: Notify::new(),
            available: AtomicBool::new(true),
            writable: AtomicBool::new(true),
        }
    }

    /// Make every operation fail with `Unavailable` while `false`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn is_writable(&self) -> bool {
        self.is_available() && self.writable.load(Ordering::SeqCst)
    }

    fn check_readable(&self) -> Result<(), ConsensusError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(ConsensusError::Unavailable)
        }
    }

    fn check_writable(&self) -> Result<(), ConsensusError> {
        self.check_readable()?;
        if self.writable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConsensusError::TryAgain)
        }
    }

    fn write(&self, key: &str, value: Option<String>) {
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.to_string()).or_default();
            entry.value = value;
            entry.version += 1;
        }
        self.changed.notify_waiters();
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, ConsensusError> {
        self.check_readable()?;
        Ok(self
            .entries
            .lock()
            .get(key)
            .and_then(|entry| entry.value.clone()))
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), ConsensusError> {
        self.check_writable()?;
        self.write(key, Some(value.into()));
        Ok(())
    }

    /// Create `key`; fails with `AlreadyExists` if it holds a value
    pub fn create(&self, key: &str, value: impl Into<String>) -> Result<(), ConsensusError> {
        self.check_writable()?;
        {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.to_string()).or_default();
            if entry.value.is_some() {
                return Err(ConsensusError::AlreadyExists);
            }
            entry.value = Some(value.into());
            entry.version += 1;
        }
        self.changed.notify_waiters();
        Ok(())
    }

    /// Replace the value of `key` only if it currently equals `prev`
    pub fn set_if_prev(
        &self,
        key: &str,
        prev: &str,
        value: impl Into<String>,
    ) -> Result<bool, ConsensusError> {
        self.check_writable()?;
        {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.value.as_deref() == Some(prev) => {
                    entry.value = Some(value.into());
                    entry.version += 1;
                }
                _ => return Ok(false),
            }
        }
        self.changed.notify_waiters();
        Ok(true)
    }

    /// Remove `key`; returns whether it held a value
    pub fn delete(&self, key: &str) -> Result<bool, ConsensusError> {
        self.check_writable()?;
        let existed = self
            .entries
            .lock()
            .get(key)
            .map(|entry| entry.value.is_some())
            .unwrap_or(false);
        if existed {
            self.write(key, None);
        }
        Ok(existed)
    }

    /// Remove `key` only if it currently equals `prev`
    pub fn delete_if_prev(&self, key: &str, prev: &str) -> Result<bool, ConsensusError> {
        self.check_writable()?;
        {
            let mut entries = self.entries.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.value.as_deref() == Some(prev) => {
                    entry.value = None;
                    entry.version += 1;
                }
                _ => return Ok(false),
            }
        }
        self.changed.notify_waiters();
        Ok(true)
    }

    fn version(&self, key: &str) -> u64 {
        self.entries
            .lock()
            .get(key)
            .map(|entry| entry.version)
            .unwrap_or(0)
    }

    fn changed_since(&self, key: &str, version: u64) -> Option<(u64, String)> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.version > version => {
                Some((entry.version, entry.value.clone().unwrap_or_default()))
            }
            _ => None,
        }
    }

    /// Wait until `key` moves past `version`; several writes in between
    /// collapse into the latest value
    async fn wait_for_change(&self, key: &str, version: u64) -> (u64, String) {
        loop {
            // Register before checking so a write in between is not lost
            let notified = self.changed.notified();
            if let Some(change) = self.changed_since(key, version) {
                return change;
            }
            notified.await;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Consensus client for one node backed by a [`MemoryStore`]
#[derive(Clone)]
pub struct MemoryConsensus {
    node_id: NodeId,
    config: ConsensusConfig,
    store: Arc<MemoryStore>,
}

impl MemoryConsensus {
    pub fn new(node_id: NodeId, config: ConsensusConfig, store: Arc<MemoryStore>) -> Self {
        Self {
            node_id,
            config,
            store,
        }
    }

    /// Client with a private store, writable as configured
    pub fn standalone(node_id: NodeId, config: ConsensusConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.set_writable(config.writable);
        Self::new(node_id, config, store)
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn lock_key() -> &'static str {
        ConsensusKey::ActiveController.as_str()
    }

    /// File a `NEW` request unless one is pending. An answered request
    /// (`REJECTED` or `FENCE`) is replaced.
    fn file_takeover_request(&self, owner: NodeId, cluster_size: u64) {
        let key = ConsensusKey::TakeoverRequest.as_str();
        let request = TakeoverRequest::new(owner, self.node_id, cluster_size);

        let filed = match self.store.get(key) {
            Ok(Some(existing)) => match existing.parse::<TakeoverRequest>() {
                Ok(pending) if pending.state == TakeoverState::New => {
                    debug!("Takeover request '{}' is already pending", pending);
                    return;
                }
                _ => self.store.set_if_prev(key, &existing, request.to_string()),
            },
            Ok(None) => self.store.create(key, request.to_string()).map(|()| true),
            Err(e) => Err(e),
        };

        match filed {
            Ok(true) => info!("Filed takeover request '{}'", request),
            Ok(false) | Err(ConsensusError::AlreadyExists) => {
                debug!("Takeover request changed while filing, leaving it")
            }
            Err(e) => warn!("Failed to file takeover request: {}", e),
        }
    }
}

#[async_trait]
impl ConsensusClient for MemoryConsensus {
    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn is_relaxed_node_promotion_enabled(&self) -> bool {
        self.config.enabled && self.config.relaxed_node_promotion
    }

    fn is_remote_fencing_enabled(&self) -> bool {
        self.config.enabled && self.config.remote_fencing
    }

    fn takeover_valid_time(&self) -> Duration {
        self.config.takeover_valid_time
    }

    fn prioritise_partition_size(&self) -> bool {
        self.config.prioritise_partition_size
    }

    fn prioritise_partition_size_wait_time(&self) -> Duration {
        self.config.prioritise_partition_size_wait_time
    }

    async fn is_writable(&self) -> bool {
        !self.config.enabled || self.store.is_writable()
    }

    async fn promote_this_node(
        &self,
        graceful_takeover: bool,
        cluster_size: u64,
    ) -> Result<(), ConsensusError> {
        if !self.config.enabled {
            return Ok(());
        }

        let me = self.node_id.as_u32().to_string();
        match self.store.get(Self::lock_key())? {
            Some(owner) if owner == me => {
                trace!("Already holding the active controller lock");
                Ok(())
            }
            Some(owner) => {
                debug!("Active controller lock is held by {}", owner);
                if graceful_takeover {
                    if let Ok(owner) = owner.parse::<NodeId>() {
                        self.file_takeover_request(owner, cluster_size);
                    }
                }
                Err(ConsensusError::AlreadyExists)
            }
            None => {
                self.store.create(Self::lock_key(), me)?;
                info!("Acquired the active controller lock for {}", self.node_id);
                Ok(())
            }
        }
    }

    async fn active_controller(&self) -> Result<Option<NodeId>, ConsensusError> {
        if !self.config.enabled {
            return Err(ConsensusError::Disabled);
        }

        Ok(self
            .store
            .get(Self::lock_key())?
            .and_then(|owner| owner.parse().ok()))
    }

    async fn read_takeover_request(&self) -> Result<String, ConsensusError> {
        match self.store.get(ConsensusKey::TakeoverRequest.as_str())? {
            Some(request) if !request.is_empty() => Ok(request),
            _ => Err(ConsensusError::TryAgain),
        }
    }

    fn self_fence(&self, request: &str) -> bool {
        match request.parse::<TakeoverRequest>() {
            Ok(request) => {
                request.state == TakeoverState::Fence && request.current_owner == self.node_id
            }
            Err(e) => {
                debug!("{}", e);
                false
            }
        }
    }

    async fn reject_takeover_request(&self, request: &str) -> Result<bool, ConsensusError> {
        let parsed = match request.parse::<TakeoverRequest>() {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("{}", e);
                return Ok(false);
            }
        };
        if parsed.state != TakeoverState::New || parsed.current_owner != self.node_id {
            return Ok(false);
        }

        let answer = parsed.with_state(TakeoverState::Rejected).to_string();
        self.store
            .set_if_prev(ConsensusKey::TakeoverRequest.as_str(), request, answer)
    }

    async fn demote_this_node(&self) -> Result<bool, ConsensusError> {
        if !self.config.enabled {
            return Ok(false);
        }

        let me = self.node_id.as_u32().to_string();
        let released = self.store.delete_if_prev(Self::lock_key(), &me)?;
        if released {
            info!("Released the active controller lock for {}", self.node_id);
        }
        Ok(released)
    }

    fn revision(&self, key: ConsensusKey) -> Revision {
        Revision(self.store.version(key.as_str()))
    }

    async fn watch(
        &self,
        key: ConsensusKey,
        since: Revision,
    ) -> Result<(Revision, String), ConsensusError> {
        if !self.config.enabled {
            return Err(ConsensusError::Disabled);
        }

        let (version, value) = self.store.wait_for_change(key.as_str(), since.0).await;
        Ok((Revision(version), value))
    }
}
