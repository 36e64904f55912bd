use std::str::FromStr;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::{Error, Result};

/// A collection as recorded in the system catalog.
///
/// Only the channel is persisted. The owning member is recomputed from the
/// current memberlist whenever it is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub channel: String,
    pub created_at: i64,
}

/// Durable record of collections and their channels.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fails with `AlreadyExists` if the id or the name is taken.
    async fn create_collection(&self, collection: Collection) -> Result<Collection>;

    async fn get_collection(&self, id: &str) -> Result<Option<Collection>>;

    async fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>>;

    /// All collections ordered by name.
    async fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Returns whether a collection was removed.
    async fn delete_collection(&self, id: &str) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogProvider {
    Memory,
    Database,
}

impl FromStr for CatalogProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CatalogProvider::Memory),
            "database" => Ok(CatalogProvider::Database),
            other => Err(Error::config(format!(
                "invalid system catalog provider {other:?}, only memory and database are supported"
            ))),
        }
    }
}

/// Process-local catalog. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryCatalog {
    by_id: DashMap<String, Collection>,
    /// name -> id
    names: DashMap<String, String>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn create_collection(&self, collection: Collection) -> Result<Collection> {
        // Lock order is always names then by_id.
        match self.names.entry(collection.name.clone()) {
            Entry::Occupied(_) => Err(Error::AlreadyExists(format!(
                "collection {}",
                collection.name
            ))),
            Entry::Vacant(name_slot) => match self.by_id.entry(collection.id.clone()) {
                Entry::Occupied(_) => Err(Error::AlreadyExists(format!(
                    "collection id {}",
                    collection.id
                ))),
                Entry::Vacant(id_slot) => {
                    name_slot.insert(collection.id.clone());
                    id_slot.insert(collection.clone());
                    Ok(collection)
                }
            },
        }
    }

    async fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        Ok(self.by_id.get(id).map(|c| c.value().clone()))
    }

    async fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let Some(id) = self.names.get(name).map(|id| id.value().clone()) else {
            return Ok(None);
        };
        self.get_collection(&id).await
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let mut collections: Vec<Collection> =
            self.by_id.iter().map(|c| c.value().clone()).collect();
        collections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(collections)
    }

    async fn delete_collection(&self, id: &str) -> Result<bool> {
        match self.by_id.remove(id) {
            Some((_, collection)) => {
                self.names.remove_if(&collection.name, |_, owner| owner == id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Catalog in Postgres, in a single `collections` table.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Connect and apply the embedded migrations.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!(max_connections, "connected to catalog database");
        Ok(Self { pool })
    }

    /// Wrap an existing pool whose schema is already migrated.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn create_collection(&self, collection: Collection) -> Result<Collection> {
        let result = sqlx::query(
            r#"
INSERT INTO collections (id, name, channel, created_at)
VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&collection.id)
        .bind(&collection.name)
        .bind(&collection.channel)
        .bind(collection.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(collection),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(
                Error::AlreadyExists(format!("collection {}", collection.name)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        let row = sqlx::query_as::<_, Collection>(
            "SELECT id, name, channel, created_at FROM collections WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_collection_by_name(&self, name: &str) -> Result<Option<Collection>> {
        let row = sqlx::query_as::<_, Collection>(
            "SELECT id, name, channel, created_at FROM collections WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query_as::<_, Collection>(
            "SELECT id, name, channel, created_at FROM collections ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn delete_collection(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM collections WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
