mod hash;
mod rendezvous;
mod simple;

pub use hash::{rendezvous_weight, stable_hash};
pub use rendezvous::RendezvousPolicy;
pub use simple::SimplePolicy;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::Member;

/// Which assignment strategy the coordinator runs with. Fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// Hash modulo a fixed, pre-provisioned channel set.
    Simple,
    /// Highest-random-weight hashing over the live members.
    Rendezvous,
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "simple" => Ok(StrategyKind::Simple),
            "rendezvous" => Ok(StrategyKind::Rendezvous),
            other => Err(Error::config(format!(
                "invalid assignment policy {other:?}, only simple and rendezvous are supported"
            ))),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyKind::Simple => f.write_str("simple"),
            StrategyKind::Rendezvous => f.write_str("rendezvous"),
        }
    }
}

/// Immutable policy configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentPolicyConfig {
    pub tenant: String,
    pub namespace: String,
    pub strategy: StrategyKind,
    /// Size of the fixed channel set. Only used by `Simple`.
    pub channel_count: u32,
    /// Topic name prefix for the fixed channel set. Only used by `Simple`.
    pub channel_prefix: String,
}

impl AssignmentPolicyConfig {
    pub fn build(&self) -> Result<Arc<dyn AssignmentPolicy>> {
        let policy: Arc<dyn AssignmentPolicy> = match self.strategy {
            StrategyKind::Simple => Arc::new(SimplePolicy::new(
                self.channel_prefix.clone(),
                self.channel_count,
            )?),
            StrategyKind::Rendezvous => Arc::new(RendezvousPolicy::new()),
        };
        Ok(policy)
    }

    /// Topics that must exist before the policy can hand out channels.
    /// Empty for strategies that derive channel names per resource.
    pub fn topics_to_provision(&self) -> Vec<String> {
        match self.strategy {
            StrategyKind::Simple => (0..self.channel_count)
                .map(|index| simple::topic_name(&self.channel_prefix, index))
                .collect(),
            StrategyKind::Rendezvous => Vec::new(),
        }
    }
}

/// Result of assigning one resource against one membership snapshot.
///
/// Never persisted: it is recomputed whenever the caller needs it, so it
/// always reflects the snapshot it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceAssignment {
    /// Fully qualified channel, `persistent://{tenant}/{namespace}/{topic}`.
    pub channel: String,
    /// Owning member id, for strategies that route to members.
    pub owner: Option<String>,
}

/// Deterministic mapping from a resource to its channel and owner.
///
/// Implementations hold only immutable configuration, so one instance can be
/// shared across request paths. The caller supplies the membership snapshot.
pub trait AssignmentPolicy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Fails with `NoAvailableMembers` when `members` is empty; callers should
    /// retry after the next reconciliation tick.
    fn assign(
        &self,
        tenant: &str,
        namespace: &str,
        resource_id: &str,
        members: &[Member],
    ) -> Result<ResourceAssignment>;
}

fn ensure_members(resource_id: &str, members: &[Member]) -> Result<()> {
    if members.is_empty() {
        return Err(Error::NoAvailableMembers {
            resource_id: resource_id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(strategy: StrategyKind) -> AssignmentPolicyConfig {
        AssignmentPolicyConfig {
            tenant: "default".to_string(),
            namespace: "default".to_string(),
            strategy,
            channel_count: 4,
            channel_prefix: "shard_log_".to_string(),
        }
    }

    #[test]
    fn strategy_kind_parses_known_names() {
        assert_eq!(
            "simple".parse::<StrategyKind>().unwrap(),
            StrategyKind::Simple
        );
        assert_eq!(
            " Rendezvous ".parse::<StrategyKind>().unwrap(),
            StrategyKind::Rendezvous
        );
    }

    #[test]
    fn strategy_kind_rejects_unknown_names() {
        let err = "consistent".parse::<StrategyKind>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("consistent"));
    }

    #[test]
    fn build_dispatches_on_kind() {
        for kind in [StrategyKind::Simple, StrategyKind::Rendezvous] {
            let policy = config(kind).build().unwrap();
            assert_eq!(policy.kind(), kind);
        }
    }

    #[test]
    fn only_simple_needs_provisioning() {
        assert_eq!(
            config(StrategyKind::Simple).topics_to_provision(),
            vec!["shard_log_0", "shard_log_1", "shard_log_2", "shard_log_3"]
        );
        assert!(config(StrategyKind::Rendezvous)
            .topics_to_provision()
            .is_empty());
    }

    #[test]
    fn both_strategies_reject_empty_members() {
        for kind in [StrategyKind::Simple, StrategyKind::Rendezvous] {
            let policy = config(kind).build().unwrap();
            let err = policy.assign("default", "default", "r1", &[]).unwrap_err();
            assert!(
                matches!(err, Error::NoAvailableMembers { ref resource_id } if resource_id == "r1")
            );
        }
    }
}
