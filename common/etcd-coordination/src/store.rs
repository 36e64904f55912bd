use etcd_client::{Client, Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoints: Vec<String>,
    /// Key prefix for all operations, e.g. "/shard-coordinator/".
    pub prefix: String,
}

/// Outcome of a conditional write against a key's version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareAndPut {
    /// The write was applied; carries the key's new version.
    Written(i64),
    /// The key's version no longer matched; carries the version observed in
    /// the same transaction (0 if the key is absent).
    Conflict(i64),
}

/// Prefixed etcd client with typed JSON helpers.
///
/// Domain stores compose these building blocks: versioned reads,
/// conditional writes keyed on the etcd key version, prefix listing and
/// lease management. Every value is stored as JSON.
///
/// `Client` wraps an inner channel, so each method clones it.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    config: StoreConfig,
}

impl EtcdStore {
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let client = Client::connect(&config.endpoints, None).await?;
        Ok(Self { client, config })
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    // ── JSON helpers ─────────────────────────────────────────────

    /// Read a key together with its etcd version.
    ///
    /// The version starts at 1 on creation and increases by one on every
    /// put. A missing key is `None`; callers treat that as version 0.
    pub async fn get_versioned<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, i64)>> {
        let resp = self.client.clone().get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => {
                let value = serde_json::from_slice(kv.value())?;
                Ok(Some((value, kv.version())))
            }
            None => Ok(None),
        }
    }

    pub async fn list<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let options = GetOptions::new().with_prefix();
        let resp = self.client.clone().get(prefix, Some(options)).await?;
        resp.kvs()
            .iter()
            .map(|kv| serde_json::from_slice(kv.value()).map_err(Error::from))
            .collect()
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        lease_id: Option<i64>,
    ) -> Result<()> {
        let value = serde_json::to_string(value)?;
        let options = lease_id.map(|id| PutOptions::new().with_lease(id));
        self.client.clone().put(key, value, options).await?;
        Ok(())
    }

    /// Write `value` only if the key's current version equals
    /// `expected_version`. Version 0 means "the key must not exist", so the
    /// first write to a key is a create.
    pub async fn compare_and_put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        expected_version: i64,
    ) -> Result<CompareAndPut> {
        let value = serde_json::to_vec(value)?;
        let txn = Txn::new()
            .when(vec![Compare::version(
                key,
                CompareOp::Equal,
                expected_version,
            )])
            .and_then(vec![TxnOp::put(key, value, None)])
            .or_else(vec![TxnOp::get(key, None)]);

        let resp = self.client.clone().txn(txn).await?;
        if resp.succeeded() {
            return Ok(CompareAndPut::Written(expected_version + 1));
        }

        let observed = resp
            .op_responses()
            .into_iter()
            .find_map(|op| match op {
                etcd_client::TxnOpResponse::Get(get) => {
                    Some(get.kvs().first().map(|kv| kv.version()).unwrap_or(0))
                }
                _ => None,
            })
            .unwrap_or(0);
        Ok(CompareAndPut::Conflict(observed))
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let options = DeleteOptions::new().with_prefix();
        self.client.clone().delete(prefix, Some(options)).await?;
        Ok(())
    }

    // ── Lease operations ─────────────────────────────────────────

    pub async fn grant_lease(&self, ttl: i64) -> Result<i64> {
        let resp = self.client.clone().lease_grant(ttl, None).await?;
        Ok(resp.id())
    }

    pub async fn keep_alive(
        &self,
        lease_id: i64,
    ) -> Result<(etcd_client::LeaseKeeper, etcd_client::LeaseKeepAliveStream)> {
        let (keeper, stream) = self.client.clone().lease_keep_alive(lease_id).await?;
        Ok((keeper, stream))
    }

    pub async fn revoke_lease(&self, lease_id: i64) -> Result<()> {
        self.client.clone().lease_revoke(lease_id).await?;
        Ok(())
    }

    // ── Cleanup ──────────────────────────────────────────────────

    /// Delete every key under this store's prefix. Used by tests.
    pub async fn delete_all(&self) -> Result<()> {
        self.delete_prefix(&self.config.prefix).await
    }
}
