use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use etcd_coordination::util::validate_identifier;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics_consts::{LIVE_MEMBERS, NODE_WATCH_FAILURES};
use crate::types::{normalize_members, Member};

/// Read-only view of the orchestration platform.
#[async_trait]
pub trait InstanceSource: Send + Sync {
    /// Ready instances carrying `role` in `namespace`.
    async fn list_instances(&self, namespace: &str, role: &str) -> Result<Vec<Member>>;
}

/// An instance source backed by a settable list.
///
/// Stands in for the platform in tests and single-process runs. It can be
/// switched into a failing mode to simulate an unreachable API.
#[derive(Default)]
pub struct StaticInstanceSource {
    state: std::sync::Mutex<StaticState>,
}

#[derive(Default)]
struct StaticState {
    members: Vec<Member>,
    unavailable: Option<String>,
}

impl StaticInstanceSource {
    pub fn new(members: Vec<Member>) -> Self {
        Self {
            state: std::sync::Mutex::new(StaticState {
                members,
                unavailable: None,
            }),
        }
    }

    pub fn set_members(&self, members: Vec<Member>) {
        if let Ok(mut state) = self.state.lock() {
            state.members = members;
        }
    }

    /// `Some(reason)` makes every listing fail with `reason` until cleared.
    pub fn set_unavailable(&self, reason: Option<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = reason;
        }
    }
}

#[async_trait]
impl InstanceSource for StaticInstanceSource {
    async fn list_instances(&self, _namespace: &str, _role: &str) -> Result<Vec<Member>> {
        let state = self
            .state
            .lock()
            .map_err(|_| Error::Discovery("static instance source poisoned".to_string()))?;
        match &state.unavailable {
            Some(reason) => Err(Error::Discovery(reason.clone())),
            None => Ok(state.members.clone()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub namespace: String,
    pub role: String,
    pub interval: Duration,
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::config("watch interval must be non-zero"));
        }
        validate_identifier(&self.namespace)
            .map_err(|e| Error::config(format!("invalid worker namespace: {e}")))?;
        if self.role.trim().is_empty() {
            return Err(Error::config("worker role must not be empty"));
        }
        Ok(())
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            role: "worker".to_string(),
            interval: Duration::from_secs(1),
        }
    }
}

/// What the watcher currently believes the live member set is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberSnapshot {
    /// Members from the most recent successful refresh.
    pub members: Vec<Member>,
    /// Set when the latest refresh failed. `members` is then the last known
    /// good set, not a fresh observation.
    pub warning: Option<String>,
}

impl MemberSnapshot {
    pub fn is_stale(&self) -> bool {
        self.warning.is_some()
    }
}

#[derive(Default)]
struct WatchState {
    /// `None` until the first successful refresh.
    members: Option<Vec<Member>>,
    last_error: Option<String>,
}

/// Polls an `InstanceSource` on a fixed interval and keeps the last known
/// good member set.
///
/// A failed poll never clears the snapshot. It is recorded as a warning on
/// the snapshot until the next successful poll.
pub struct NodeWatcher {
    source: Arc<dyn InstanceSource>,
    config: WatcherConfig,
    state: RwLock<WatchState>,
}

impl NodeWatcher {
    pub fn new(source: Arc<dyn InstanceSource>, config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            state: RwLock::new(WatchState::default()),
        })
    }

    /// Current member set.
    ///
    /// Errors only if no refresh has ever succeeded: `Error::Discovery` if
    /// the last attempt failed, `Error::NotReady` if none was made yet.
    pub async fn current_members(&self) -> Result<MemberSnapshot> {
        let state = self.state.read().await;
        match (&state.members, &state.last_error) {
            (Some(members), warning) => Ok(MemberSnapshot {
                members: members.clone(),
                warning: warning.clone(),
            }),
            (None, Some(error)) => Err(Error::Discovery(error.clone())),
            (None, None) => Err(Error::NotReady),
        }
    }

    /// Query the source once and update the snapshot. Returns the number of
    /// live members on success.
    pub async fn refresh(&self) -> Result<usize> {
        let result = self
            .source
            .list_instances(&self.config.namespace, &self.config.role)
            .await;

        let mut state = self.state.write().await;
        match result {
            Ok(members) => {
                let members = normalize_members(members);
                let count = members.len();
                metrics::gauge!(LIVE_MEMBERS).set(count as f64);
                debug!(
                    namespace = %self.config.namespace,
                    role = %self.config.role,
                    members = count,
                    "refreshed live members"
                );
                state.members = Some(members);
                state.last_error = None;
                Ok(count)
            }
            Err(e) => {
                metrics::counter!(NODE_WATCH_FAILURES).increment(1);
                warn!(
                    namespace = %self.config.namespace,
                    role = %self.config.role,
                    error = %e,
                    retained = state.members.as_ref().map_or(0, Vec::len),
                    "failed to list instances, keeping last known members"
                );
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Poll until cancelled. The first poll runs immediately, and an
    /// in-flight poll is abandoned on cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        // Failures are logged and recorded on the snapshot.
                        result = self.refresh() => drop(result),
                    }
                }
            }
        }
    }
}
