use std::sync::Arc;

use etcd_coordination::util::now_seconds;
use tracing::info;
use uuid::Uuid;

use crate::assignment::{AssignmentPolicy, ResourceAssignment};
use crate::catalog::{Catalog, Collection};
use crate::error::{Error, Result};
use crate::memberlist_store::MemberlistStore;
use crate::metrics_consts::COLLECTIONS_CREATED;
use crate::types::Memberlist;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub memberlist_name: String,
    pub tenant: String,
    pub namespace: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            memberlist_name: "worker-memberlist".to_string(),
            tenant: "default".to_string(),
            namespace: "default".to_string(),
        }
    }
}

/// Request-path facade over the catalog and the assignment policy.
///
/// Every assignment is computed against a fresh read of the stored
/// memberlist, never against a cached one.
pub struct Coordinator {
    catalog: Arc<dyn Catalog>,
    policy: Arc<dyn AssignmentPolicy>,
    memberlists: Arc<dyn MemberlistStore>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        policy: Arc<dyn AssignmentPolicy>,
        memberlists: Arc<dyn MemberlistStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            catalog,
            policy,
            memberlists,
            config,
        }
    }

    pub fn policy(&self) -> &dyn AssignmentPolicy {
        self.policy.as_ref()
    }

    /// The stored memberlist the coordinator assigns against.
    pub async fn current_memberlist(&self) -> Result<Memberlist> {
        self.memberlists.get(&self.config.memberlist_name).await
    }

    /// Create a collection and record the channel it was assigned.
    ///
    /// A random id is generated when `id` is `None`. Fails with
    /// `NoAvailableMembers` while the memberlist is empty, and nothing is
    /// persisted in that case.
    pub async fn create_collection(&self, name: &str, id: Option<String>) -> Result<Collection> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidArgument(
                "collection name must not be empty".to_string(),
            ));
        }
        if self.catalog.get_collection_by_name(name).await?.is_some() {
            return Err(Error::AlreadyExists(format!("collection {name}")));
        }

        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(Error::InvalidArgument(
                    "collection id must not be empty".to_string(),
                ))
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let memberlist = self.current_memberlist().await?;
        let assignment = self.assign(&id, &memberlist)?;

        let collection = self
            .catalog
            .create_collection(Collection {
                id,
                name: name.to_string(),
                channel: assignment.channel,
                created_at: now_seconds(),
            })
            .await?;

        metrics::counter!(COLLECTIONS_CREATED, "strategy" => self.policy.kind().to_string())
            .increment(1);
        info!(
            collection = %collection.id,
            name = %collection.name,
            channel = %collection.channel,
            owner = assignment.owner.as_deref().unwrap_or("-"),
            memberlist_version = %memberlist.version,
            "created collection"
        );
        Ok(collection)
    }

    pub async fn get_collection(&self, id: &str) -> Result<Collection> {
        self.catalog
            .get_collection(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("collection {id}")))
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        self.catalog.list_collections().await
    }

    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        if !self.catalog.delete_collection(id).await? {
            return Err(Error::NotFound(format!("collection {id}")));
        }
        info!(collection = %id, "deleted collection");
        Ok(())
    }

    /// Recompute where an existing collection lives under the latest
    /// memberlist.
    pub async fn resolve_assignment(&self, collection_id: &str) -> Result<ResourceAssignment> {
        let collection = self.get_collection(collection_id).await?;
        let memberlist = self.current_memberlist().await?;
        self.assign(&collection.id, &memberlist)
    }

    fn assign(&self, resource_id: &str, memberlist: &Memberlist) -> Result<ResourceAssignment> {
        self.policy.assign(
            &self.config.tenant,
            &self.config.namespace,
            resource_id,
            &memberlist.members,
        )
    }
}
