use std::collections::HashMap;

use async_trait::async_trait;
use etcd_coordination::store::{CompareAndPut, EtcdStore};
use etcd_coordination::util::{now_seconds, validate_identifier};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::types::{normalize_members, Member, Memberlist, VersionToken};

/// Durable, versioned storage for named memberlists.
///
/// Reads always hit the backing store; there is no cache that could go stale.
#[async_trait]
pub trait MemberlistStore: Send + Sync {
    /// Read a memberlist. A record that was never written reads as empty with
    /// `VersionToken::ABSENT`.
    async fn get(&self, name: &str) -> Result<Memberlist>;

    /// Replace the members of `name` if its version is still `expected`.
    ///
    /// Creates the record when `expected` is `VersionToken::ABSENT` and none
    /// exists. Fails with `Error::VersionConflict` if another writer got there
    /// first. Returns the new version on success.
    async fn compare_and_swap(
        &self,
        name: &str,
        members: &[Member],
        expected: VersionToken,
    ) -> Result<VersionToken>;
}

/// The JSON value stored under a memberlist key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMemberlist {
    pub members: Vec<Member>,
    pub updated_at: i64,
}

/// etcd key patterns used by the memberlist store.
///
/// ```text
/// {prefix}memberlists/{name}
/// ```
enum StoreKey<'a> {
    Memberlist(&'a str),
}

impl StoreKey<'_> {
    fn resolve(&self, prefix: &str) -> String {
        match self {
            StoreKey::Memberlist(name) => format!("{prefix}memberlists/{name}"),
        }
    }
}

/// Memberlists stored in etcd, one key per list.
///
/// The version token is the etcd key version, which starts at 1 and grows by
/// one on every write. Conditional writes run as a single etcd transaction
/// comparing that version.
#[derive(Clone)]
pub struct EtcdMemberlistStore {
    inner: EtcdStore,
}

impl EtcdMemberlistStore {
    pub fn new(inner: EtcdStore) -> Self {
        Self { inner }
    }

    fn key(&self, name: &str) -> Result<String> {
        validate_identifier(name)?;
        Ok(StoreKey::Memberlist(name).resolve(self.inner.prefix()))
    }
}

#[async_trait]
impl MemberlistStore for EtcdMemberlistStore {
    async fn get(&self, name: &str) -> Result<Memberlist> {
        let key = self.key(name)?;
        match self.inner.get_versioned::<StoredMemberlist>(&key).await? {
            Some((stored, version)) => Ok(Memberlist {
                name: name.to_string(),
                members: stored.members,
                version: VersionToken::new(version),
            }),
            None => Ok(Memberlist::empty(name)),
        }
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        members: &[Member],
        expected: VersionToken,
    ) -> Result<VersionToken> {
        let key = self.key(name)?;
        let stored = StoredMemberlist {
            members: normalize_members(members.to_vec()),
            updated_at: now_seconds(),
        };
        match self
            .inner
            .compare_and_put(&key, &stored, expected.value())
            .await?
        {
            CompareAndPut::Written(version) => Ok(VersionToken::new(version)),
            CompareAndPut::Conflict(actual) => Err(Error::VersionConflict {
                name: name.to_string(),
                expected,
                actual: VersionToken::new(actual),
            }),
        }
    }
}

/// Process-local memberlist store with the same token semantics as the etcd
/// store. Used by tests and single-process runs.
#[derive(Default)]
pub struct InMemoryMemberlistStore {
    lists: Mutex<HashMap<String, (Vec<Member>, VersionToken)>>,
}

impl InMemoryMemberlistStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemberlistStore for InMemoryMemberlistStore {
    async fn get(&self, name: &str) -> Result<Memberlist> {
        validate_identifier(name)?;
        let lists = self.lists.lock().await;
        Ok(match lists.get(name) {
            Some((members, version)) => Memberlist {
                name: name.to_string(),
                members: members.clone(),
                version: *version,
            },
            None => Memberlist::empty(name),
        })
    }

    async fn compare_and_swap(
        &self,
        name: &str,
        members: &[Member],
        expected: VersionToken,
    ) -> Result<VersionToken> {
        validate_identifier(name)?;
        let mut lists = self.lists.lock().await;
        let actual = lists
            .get(name)
            .map(|(_, version)| *version)
            .unwrap_or(VersionToken::ABSENT);
        if actual != expected {
            return Err(Error::VersionConflict {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        let next = VersionToken::new(actual.value() + 1);
        lists.insert(name.to_string(), (normalize_members(members.to_vec()), next));
        Ok(next)
    }
}
