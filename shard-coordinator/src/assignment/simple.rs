use crate::channel::channel_name;
use crate::error::{Error, Result};
use crate::types::Member;

use super::hash::stable_hash;
use super::{ensure_members, AssignmentPolicy, ResourceAssignment, StrategyKind};

pub(super) fn topic_name(prefix: &str, index: u32) -> String {
    format!("{prefix}{index}")
}

/// Routes each resource to one of a fixed set of pre-provisioned channels.
///
/// The channel index is `hash(resource_id) % channel_count`, so as long as
/// the channel count never changes a resource keeps its channel forever,
/// whatever happens to the worker set. Members are only checked for
/// emptiness; they never influence the result.
#[derive(Debug, Clone)]
pub struct SimplePolicy {
    channel_prefix: String,
    channel_count: u32,
}

impl SimplePolicy {
    pub fn new(channel_prefix: impl Into<String>, channel_count: u32) -> Result<Self> {
        if channel_count == 0 {
            return Err(Error::config(
                "simple assignment policy needs at least one channel",
            ));
        }
        Ok(Self {
            channel_prefix: channel_prefix.into(),
            channel_count,
        })
    }

    pub fn channel_index(&self, resource_id: &str) -> u32 {
        (stable_hash(resource_id) % u64::from(self.channel_count)) as u32
    }
}

impl AssignmentPolicy for SimplePolicy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Simple
    }

    fn assign(
        &self,
        tenant: &str,
        namespace: &str,
        resource_id: &str,
        members: &[Member],
    ) -> Result<ResourceAssignment> {
        ensure_members(resource_id, members)?;
        let topic = topic_name(&self.channel_prefix, self.channel_index(resource_id));
        Ok(ResourceAssignment {
            channel: channel_name(tenant, namespace, &topic),
            owner: None,
        })
    }
}
