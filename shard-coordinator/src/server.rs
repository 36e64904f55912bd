use std::sync::Arc;

use etcd_coordination::store::{EtcdStore, StoreConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::assignment::StrategyKind;
use crate::catalog::{Catalog, CatalogProvider, MemoryCatalog, PgCatalog};
use crate::channel::{ChannelProvisioner, NoopProvisioner, PulsarAdminProvisioner};
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::instance_registry::EtcdInstanceSource;
use crate::memberlist_manager::{ManagerHandle, MemberlistManager};
use crate::memberlist_store::{EtcdMemberlistStore, InMemoryMemberlistStore, MemberlistStore};
use crate::node_watcher::{InstanceSource, NodeWatcher};

/// Collaborators to use instead of the ones built from `Config`.
#[derive(Default)]
pub struct ServerDeps {
    pub catalog: Option<Arc<dyn Catalog>>,
    pub provisioner: Option<Arc<dyn ChannelProvisioner>>,
    pub instance_source: Option<Arc<dyn InstanceSource>>,
    pub memberlist_store: Option<Arc<dyn MemberlistStore>>,
}

/// A started coordinator process: the request-path `Coordinator` plus the
/// background reconciliation loop.
pub struct Server {
    coordinator: Arc<Coordinator>,
    manager: Option<ManagerHandle>,
    cancel: CancellationToken,
}

impl Server {
    /// Build everything and start the reconciliation loop.
    ///
    /// Configuration switches are checked before anything connects, and any
    /// failure returns before a partially started server exists.
    pub async fn start(config: Config, deps: ServerDeps) -> Result<Self> {
        config.validate()?;
        let policy_config = config.assignment_policy_config()?;
        let catalog_provider = config.catalog_provider()?;

        let catalog = match deps.catalog {
            Some(catalog) => catalog,
            None => build_catalog(&config, catalog_provider).await?,
        };

        let policy = policy_config.build()?;
        info!(strategy = %policy_config.strategy, "using assignment policy");

        let topics = policy_config.topics_to_provision();
        if !topics.is_empty() {
            let provisioner: Arc<dyn ChannelProvisioner> = match deps.provisioner {
                Some(provisioner) => provisioner,
                None if config.pulsar_admin_url.trim().is_empty() => Arc::new(NoopProvisioner),
                None => Arc::new(PulsarAdminProvisioner::new(
                    config.pulsar_admin_url.clone(),
                    config.provision_timeout(),
                )?),
            };
            provisioner
                .create_channels(&policy_config.tenant, &policy_config.namespace, &topics)
                .await?;
        }

        // Connected once and shared by the etcd-backed components.
        let mut etcd: Option<EtcdStore> = None;

        let memberlist_store: Arc<dyn MemberlistStore> = match deps.memberlist_store {
            Some(store) => store,
            None if config.testing => Arc::new(InMemoryMemberlistStore::new()),
            None => Arc::new(EtcdMemberlistStore::new(
                etcd_store(&config, &mut etcd).await?,
            )),
        };

        let coordinator = Arc::new(Coordinator::new(
            catalog,
            policy,
            Arc::clone(&memberlist_store),
            config.coordinator_config(),
        ));

        let cancel = CancellationToken::new();
        let manager = if config.testing {
            info!("testing mode, memberlist manager disabled");
            None
        } else {
            let source: Arc<dyn InstanceSource> = match deps.instance_source {
                Some(source) => source,
                None => Arc::new(EtcdInstanceSource::new(
                    etcd_store(&config, &mut etcd).await?,
                )),
            };
            let watcher = Arc::new(NodeWatcher::new(source, config.watcher_config())?);
            let manager = Arc::new(MemberlistManager::new(
                watcher,
                memberlist_store,
                config.manager_config(),
            )?);
            Some(manager.start(cancel.clone()))
        };

        info!(
            catalog = ?catalog_provider,
            strategy = %policy_config.strategy,
            memberlist = %config.worker_memberlist_name,
            "shard coordinator started"
        );

        Ok(Self {
            coordinator,
            manager,
            cancel,
        })
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn strategy(&self) -> StrategyKind {
        self.coordinator.policy().kind()
    }

    pub fn is_reconciling(&self) -> bool {
        self.manager.as_ref().is_some_and(ManagerHandle::is_running)
    }

    /// Stop the reconciliation loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(manager) = self.manager {
            manager.stop().await;
        }
        info!("shard coordinator stopped");
    }
}

async fn build_catalog(config: &Config, provider: CatalogProvider) -> Result<Arc<dyn Catalog>> {
    let catalog: Arc<dyn Catalog> = match provider {
        CatalogProvider::Memory => Arc::new(MemoryCatalog::new()),
        CatalogProvider::Database => Arc::new(
            PgCatalog::connect(config.database_url()?, config.max_pg_connections).await?,
        ),
    };
    Ok(catalog)
}

async fn etcd_store(config: &Config, slot: &mut Option<EtcdStore>) -> Result<EtcdStore> {
    if let Some(store) = slot {
        return Ok(store.clone());
    }
    let store = EtcdStore::connect(StoreConfig {
        endpoints: config.etcd_endpoint_list(),
        prefix: config.etcd_prefix.clone(),
    })
    .await?;
    *slot = Some(store.clone());
    Ok(store)
}
