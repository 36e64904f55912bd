use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use etcd_coordination::store::EtcdStore;
use etcd_coordination::util::{self, validate_identifier};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::node_watcher::InstanceSource;
use crate::types::Member;

/// A worker instance registered under
/// `{prefix}instances/{namespace}/{name}`.
///
/// The key is attached to the worker's lease, so it disappears on its own
/// when the worker stops heartbeating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredInstance {
    pub name: String,
    pub address: String,
    pub role: String,
    pub status: InstanceStatus,
    pub registered_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Serving and eligible for membership.
    Ready,
    /// Shutting down; excluded from membership while still registered.
    Draining,
}

impl RegisteredInstance {
    pub fn member(&self) -> Member {
        Member::new(self.name.clone(), self.address.clone())
    }
}

enum StoreKey<'a> {
    Instance { namespace: &'a str, name: &'a str },
    InstancesInNamespace(&'a str),
}

impl StoreKey<'_> {
    fn resolve(&self, prefix: &str) -> String {
        match self {
            StoreKey::Instance { namespace, name } => {
                format!("{prefix}instances/{namespace}/{name}")
            }
            StoreKey::InstancesInNamespace(namespace) => {
                format!("{prefix}instances/{namespace}/")
            }
        }
    }
}

/// Lists ready instances from the etcd registry.
#[derive(Clone)]
pub struct EtcdInstanceSource {
    inner: EtcdStore,
}

impl EtcdInstanceSource {
    pub fn new(inner: EtcdStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl InstanceSource for EtcdInstanceSource {
    async fn list_instances(&self, namespace: &str, role: &str) -> Result<Vec<Member>> {
        validate_identifier(namespace)?;
        let key = StoreKey::InstancesInNamespace(namespace).resolve(self.inner.prefix());
        let instances: Vec<RegisteredInstance> = self.inner.list(&key).await?;
        Ok(ready_members(&instances, role))
    }
}

/// Members for every `Ready` instance with the given role.
fn ready_members(instances: &[RegisteredInstance], role: &str) -> Vec<Member> {
    instances
        .iter()
        .filter(|i| i.status == InstanceStatus::Ready && i.role == role)
        .map(RegisteredInstance::member)
        .collect()
}

#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    pub namespace: String,
    pub name: String,
    pub address: String,
    pub role: String,
    pub lease_ttl: i64,
    pub heartbeat_interval: Duration,
}

impl RegistrationConfig {
    /// The heartbeat has to fire at least once per lease TTL or the
    /// registration lapses between keep-alives.
    pub fn validate(&self) -> Result<()> {
        validate_identifier(&self.namespace)?;
        validate_identifier(&self.name)?;
        if self.lease_ttl <= 0 {
            return Err(Error::config("instance lease ttl must be positive"));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(Error::config("heartbeat interval must be non-zero"));
        }
        let ttl = Duration::from_secs(self.lease_ttl.unsigned_abs());
        if self.heartbeat_interval >= ttl {
            return Err(Error::config(format!(
                "heartbeat interval {:?} must be shorter than lease ttl {ttl:?}",
                self.heartbeat_interval
            )));
        }
        Ok(())
    }
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name: "worker-0".to_string(),
            address: "127.0.0.1:50051".to_string(),
            role: "worker".to_string(),
            lease_ttl: 30,
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

/// Worker-side half of the registry: keeps one instance registered while
/// the worker is up.
pub struct InstanceRegistration {
    store: EtcdStore,
    config: RegistrationConfig,
    /// Lease held by `run`, 0 while not registered.
    lease_id: AtomicI64,
}

impl InstanceRegistration {
    pub fn new(store: EtcdStore, config: RegistrationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            lease_id: AtomicI64::new(0),
        })
    }

    fn key(&self) -> String {
        StoreKey::Instance {
            namespace: &self.config.namespace,
            name: &self.config.name,
        }
        .resolve(self.store.prefix())
    }

    fn instance(&self, status: InstanceStatus) -> RegisteredInstance {
        RegisteredInstance {
            name: self.config.name.clone(),
            address: self.config.address.clone(),
            role: self.config.role.clone(),
            status,
            registered_at: util::now_seconds(),
        }
    }

    /// Register and keep the lease alive until cancelled, then revoke the
    /// lease so the instance drops out on the next watcher poll rather than
    /// after the lease TTL.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let lease_id = self.store.grant_lease(self.config.lease_ttl).await?;
        self.store
            .put(&self.key(), &self.instance(InstanceStatus::Ready), Some(lease_id))
            .await?;
        self.lease_id.store(lease_id, Ordering::SeqCst);

        info!(
            instance = %self.config.name,
            namespace = %self.config.namespace,
            lease_id,
            "registered instance"
        );

        let result = util::run_lease_keepalive(
            &self.store,
            lease_id,
            self.config.heartbeat_interval,
            cancel,
        )
        .await;

        self.lease_id.store(0, Ordering::SeqCst);
        if let Err(e) = self.store.revoke_lease(lease_id).await {
            warn!(instance = %self.config.name, error = %e, "failed to revoke lease");
        }

        Ok(result?)
    }

    /// Mark the instance as draining so it leaves the live set while it
    /// finishes in-flight work. Only valid while `run` is registered.
    pub async fn drain(&self) -> Result<()> {
        let lease_id = self.lease_id.load(Ordering::SeqCst);
        if lease_id == 0 {
            return Err(Error::NotFound(format!(
                "instance {} is not registered",
                self.config.name
            )));
        }
        self.store
            .put(
                &self.key(),
                &self.instance(InstanceStatus::Draining),
                Some(lease_id),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str, role: &str, status: InstanceStatus) -> RegisteredInstance {
        RegisteredInstance {
            name: name.to_string(),
            address: format!("{name}:50051"),
            role: role.to_string(),
            status,
            registered_at: 1700000000,
        }
    }

    #[test]
    fn store_key_instance() {
        assert_eq!(
            StoreKey::Instance {
                namespace: "chroma",
                name: "worker-0"
            }
            .resolve("/shard-coordinator/"),
            "/shard-coordinator/instances/chroma/worker-0"
        );
        assert_eq!(
            StoreKey::InstancesInNamespace("chroma").resolve("/test/"),
            "/test/instances/chroma/"
        );
    }

    #[test]
    fn ready_members_filters_role_and_status() {
        let instances = vec![
            instance("worker-0", "worker", InstanceStatus::Ready),
            instance("worker-1", "worker", InstanceStatus::Draining),
            instance("frontend-0", "frontend", InstanceStatus::Ready),
            instance("worker-2", "worker", InstanceStatus::Ready),
        ];
        let members = ready_members(&instances, "worker");
        assert_eq!(
            members,
            vec![
                Member::new("worker-0", "worker-0:50051"),
                Member::new("worker-2", "worker-2:50051"),
            ]
        );
    }

    #[test]
    fn registration_config_validation() {
        RegistrationConfig::default().validate().unwrap();

        let config = RegistrationConfig {
            lease_ttl: 5,
            heartbeat_interval: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Config(ref msg)) if msg.contains("shorter than lease ttl")
        ));

        let config = RegistrationConfig {
            heartbeat_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = RegistrationConfig {
            lease_ttl: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = RegistrationConfig {
            name: "workers/0".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Store(_))));
    }

    #[test]
    fn instance_status_variants_serialize() {
        for (status, expected) in [
            (InstanceStatus::Ready, "\"Ready\""),
            (InstanceStatus::Draining, "\"Draining\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
        }
    }
}
