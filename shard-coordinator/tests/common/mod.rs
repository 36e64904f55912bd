#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use etcd_coordination::store::{EtcdStore, StoreConfig};
use etcd_coordination::util::Backoff;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use shard_coordinator::error::Result;
use shard_coordinator::instance_registry::{InstanceRegistration, RegistrationConfig};
use shard_coordinator::memberlist_manager::{ManagerConfig, ManagerHandle, MemberlistManager};
use shard_coordinator::memberlist_store::MemberlistStore;
use shard_coordinator::node_watcher::{InstanceSource, NodeWatcher, WatcherConfig};
use shard_coordinator::types::Member;

pub const ETCD_ENDPOINT: &str = "http://localhost:2379";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const MEMBERLIST: &str = "worker-memberlist";
pub const NAMESPACE: &str = "test";

pub async fn test_etcd(test_name: &str) -> EtcdStore {
    let prefix = format!("/test-{}-{}/", test_name, uuid::Uuid::new_v4());
    let config = StoreConfig {
        endpoints: vec![ETCD_ENDPOINT.to_string()],
        prefix,
    };
    EtcdStore::connect(config)
        .await
        .expect("failed to connect to etcd")
}

pub async fn wait_for_condition<F, Fut>(timeout: Duration, interval: Duration, f: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f().await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("condition not met within {timeout:?}");
}

pub fn member(id: &str) -> Member {
    Member::new(id, format!("{id}.workers:50051"))
}

pub fn members(ids: &[&str]) -> Vec<Member> {
    ids.iter().map(|id| member(id)).collect()
}

/// Member ids currently in the stored memberlist.
pub async fn stored_ids(store: &dyn MemberlistStore) -> Vec<String> {
    store
        .get(MEMBERLIST)
        .await
        .expect("failed to read memberlist")
        .members
        .into_iter()
        .map(|m| m.id)
        .collect()
}

// ── Component builders ──────────────────────────────────────────

pub fn fast_manager_config() -> ManagerConfig {
    ManagerConfig {
        memberlist_name: MEMBERLIST.to_string(),
        reconcile_interval: Duration::from_millis(50),
        max_conflict_retries: 3,
        conflict_backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(50)),
    }
}

pub fn start_manager(
    source: Arc<dyn InstanceSource>,
    store: Arc<dyn MemberlistStore>,
    cancel: CancellationToken,
) -> ManagerHandle {
    let watcher = Arc::new(NodeWatcher::new(
        source,
        WatcherConfig {
            namespace: NAMESPACE.to_string(),
            role: "worker".to_string(),
            interval: Duration::from_millis(50),
        },
    )
    .expect("valid watcher config"));
    let manager = Arc::new(
        MemberlistManager::new(watcher, store, fast_manager_config())
            .expect("valid manager config"),
    );
    manager.start(cancel)
}

// ── Worker simulation ───────────────────────────────────────────

pub struct WorkerHandle {
    pub registration: Arc<InstanceRegistration>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Revoke the registration and wait for the worker task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        self.task
            .await
            .expect("worker task panicked")
            .expect("worker registration failed");
    }
}

pub fn start_worker(etcd: &EtcdStore, name: &str) -> WorkerHandle {
    let registration = Arc::new(
        InstanceRegistration::new(
            etcd.clone(),
            RegistrationConfig {
                namespace: NAMESPACE.to_string(),
                name: name.to_string(),
                address: format!("{name}.workers:50051"),
                role: "worker".to_string(),
                lease_ttl: 5,
                heartbeat_interval: Duration::from_secs(1),
            },
        )
        .expect("invalid registration config"),
    );
    let cancel = CancellationToken::new();
    let task = {
        let registration = Arc::clone(&registration);
        let cancel = cancel.clone();
        tokio::spawn(async move { registration.run(cancel).await })
    };
    WorkerHandle {
        registration,
        cancel,
        task,
    }
}
