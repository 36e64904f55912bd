use std::time::Duration;

use envconfig::Envconfig;
use etcd_coordination::util::Backoff;

use crate::assignment::{AssignmentPolicyConfig, StrategyKind};
use crate::catalog::CatalogProvider;
use crate::coordinator::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::memberlist_manager::ManagerConfig;
use crate::node_watcher::WatcherConfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // ── etcd ────────────────────────────────────────────────────────
    #[envconfig(default = "http://localhost:2379")]
    pub etcd_endpoints: String,

    #[envconfig(default = "/shard-coordinator/")]
    pub etcd_prefix: String,

    // ── Membership ──────────────────────────────────────────────────
    #[envconfig(default = "default")]
    pub worker_namespace: String,

    #[envconfig(default = "worker")]
    pub worker_role: String,

    #[envconfig(default = "worker-memberlist")]
    pub worker_memberlist_name: String,

    #[envconfig(default = "1000")]
    pub watch_interval_ms: u64,

    #[envconfig(default = "1000")]
    pub reconcile_interval_ms: u64,

    #[envconfig(default = "3")]
    pub max_conflict_retries: u32,

    #[envconfig(default = "50")]
    pub conflict_backoff_ms: u64,

    // ── Assignment / channels ───────────────────────────────────────
    #[envconfig(default = "rendezvous")]
    pub assignment_policy: String,

    /// Empty when channels are created out of band.
    #[envconfig(default = "http://localhost:8080")]
    pub pulsar_admin_url: String,

    #[envconfig(default = "default")]
    pub pulsar_tenant: String,

    #[envconfig(default = "default")]
    pub pulsar_namespace: String,

    #[envconfig(default = "16")]
    pub channel_count: u32,

    #[envconfig(default = "shard_log_")]
    pub channel_prefix: String,

    #[envconfig(default = "5000")]
    pub provision_timeout_ms: u64,

    // ── Catalog ─────────────────────────────────────────────────────
    #[envconfig(default = "memory")]
    pub system_catalog_provider: String,

    pub database_url: Option<String>,

    #[envconfig(from = "MAX_PG_CONNECTIONS", default = "10")]
    pub max_pg_connections: u32,

    /// Skip the memberlist manager entirely.
    #[envconfig(default = "false")]
    pub testing: bool,
}

impl Config {
    pub fn init_with_defaults() -> std::result::Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn etcd_endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms)
    }

    pub fn conflict_backoff(&self) -> Duration {
        Duration::from_millis(self.conflict_backoff_ms)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_millis(self.provision_timeout_ms)
    }

    /// Reject settings the background loops cannot run with. Called once
    /// at startup, before anything connects.
    pub fn validate(&self) -> Result<()> {
        self.watcher_config().validate()?;
        self.manager_config().validate()?;
        Ok(())
    }

    pub fn strategy(&self) -> Result<StrategyKind> {
        self.assignment_policy.parse()
    }

    pub fn catalog_provider(&self) -> Result<CatalogProvider> {
        self.system_catalog_provider.parse()
    }

    /// `DATABASE_URL`, required by the database catalog provider.
    pub fn database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::config("DATABASE_URL is required for the database catalog"))
    }

    pub fn assignment_policy_config(&self) -> Result<AssignmentPolicyConfig> {
        Ok(AssignmentPolicyConfig {
            tenant: self.pulsar_tenant.clone(),
            namespace: self.pulsar_namespace.clone(),
            strategy: self.strategy()?,
            channel_count: self.channel_count,
            channel_prefix: self.channel_prefix.clone(),
        })
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            namespace: self.worker_namespace.clone(),
            role: self.worker_role.clone(),
            interval: self.watch_interval(),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        let base = self.conflict_backoff();
        ManagerConfig {
            memberlist_name: self.worker_memberlist_name.clone(),
            reconcile_interval: self.reconcile_interval(),
            max_conflict_retries: self.max_conflict_retries,
            // Backoff never outlasts a tick.
            conflict_backoff: Backoff::new(base, self.reconcile_interval().max(base)),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            memberlist_name: self.worker_memberlist_name.clone(),
            tenant: self.pulsar_tenant.clone(),
            namespace: self.pulsar_namespace.clone(),
        }
    }
}
