use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// One worker instance participating in the cluster.
///
/// Members are never edited in place: a worker that restarts with a new
/// address shows up as a different record, and the old one disappears.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Member {
    /// Stable unique identity, e.g. the pod name.
    pub id: String,
    pub address: String,
}

impl Member {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Opaque optimistic-concurrency token for a stored memberlist.
///
/// `VersionToken::ABSENT` stands for "no record yet"; a compare-and-swap
/// against it creates the record.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VersionToken(i64);

impl VersionToken {
    pub const ABSENT: VersionToken = VersionToken(0);

    pub fn new(version: i64) -> Self {
        Self(version)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_absent(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A named, versioned membership record as read from a `MemberlistStore`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memberlist {
    pub name: String,
    pub members: Vec<Member>,
    pub version: VersionToken,
}

impl Memberlist {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
            version: VersionToken::ABSENT,
        }
    }
}

/// Sort by identity and drop exact duplicates, so stored lists have a
/// canonical order regardless of how the platform listed them.
pub fn normalize_members(mut members: Vec<Member>) -> Vec<Member> {
    members.sort();
    members.dedup();
    members
}

/// Compare two member lists as unordered sets.
pub fn same_member_set(a: &[Member], b: &[Member]) -> bool {
    let a: BTreeSet<&Member> = a.iter().collect();
    let b: BTreeSet<&Member> = b.iter().collect();
    a == b
}
