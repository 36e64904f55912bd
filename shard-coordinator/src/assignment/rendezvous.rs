use std::cmp::Ordering;

use crate::channel::channel_name;
use crate::error::Result;
use crate::types::Member;

use super::hash::rendezvous_weight;
use super::{ensure_members, AssignmentPolicy, ResourceAssignment, StrategyKind};

/// Weight function: `(resource_id, member_id) -> weight`.
pub type WeightFn = fn(&str, &str) -> u64;

/// Highest-random-weight (rendezvous) assignment.
///
/// Every member gets a weight `hash(resource_id, member_id)` and the heaviest
/// one owns the resource. Equal weights go to the lexicographically smallest
/// member id. Removing a member only moves the resources it owned; adding one
/// moves about 1/(N+1) of them, all onto the newcomer.
///
/// The channel is derived from the resource itself, so no channel set needs to
/// be provisioned up front.
#[derive(Clone, Copy)]
pub struct RendezvousPolicy {
    weight: WeightFn,
}

impl std::fmt::Debug for RendezvousPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendezvousPolicy").finish_non_exhaustive()
    }
}

impl Default for RendezvousPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl RendezvousPolicy {
    pub fn new() -> Self {
        Self {
            weight: rendezvous_weight,
        }
    }

    /// Use a custom weight function. Handy for pinning weights in tests.
    pub fn with_weight_fn(weight: WeightFn) -> Self {
        Self { weight }
    }

    /// Pick the owner of `resource_id`, or `None` if `members` is empty.
    pub fn select<'a>(&self, resource_id: &str, members: &'a [Member]) -> Option<&'a Member> {
        members
            .iter()
            .map(|member| ((self.weight)(resource_id, &member.id), member))
            .max_by(|(wa, a), (wb, b)| match wa.cmp(wb) {
                // Reverse the id order so the smaller id wins a tie.
                Ordering::Equal => b.id.cmp(&a.id),
                other => other,
            })
            .map(|(_, member)| member)
    }
}

impl AssignmentPolicy for RendezvousPolicy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Rendezvous
    }

    fn assign(
        &self,
        tenant: &str,
        namespace: &str,
        resource_id: &str,
        members: &[Member],
    ) -> Result<ResourceAssignment> {
        ensure_members(resource_id, members)?;
        let owner = self
            .select(resource_id, members)
            .map(|member| member.id.clone());
        Ok(ResourceAssignment {
            channel: channel_name(tenant, namespace, resource_id),
            owner,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn members(n: usize) -> Vec<Member> {
        (0..n)
            .map(|i| Member::new(format!("worker-{i}"), format!("10.0.0.{i}:50051")))
            .collect()
    }

    fn owners(policy: &RendezvousPolicy, members: &[Member], keys: u32) -> HashMap<u32, String> {
        (0..keys)
            .map(|k| {
                let owner = policy
                    .assign("t", "ns", &format!("collection-{k}"), members)
                    .unwrap()
                    .owner
                    .unwrap();
                (k, owner)
            })
            .collect()
    }

    fn pinned_weights(resource_id: &str, member_id: &str) -> u64 {
        match (resource_id, member_id) {
            ("r1", "A") => 10,
            ("r1", "B") => 55,
            ("r1", "C") => 30,
            _ => 0,
        }
    }

    #[test]
    fn picks_heaviest_member_and_survives_removal_of_others() {
        let policy = RendezvousPolicy::with_weight_fn(pinned_weights);
        let abc = vec![
            Member::new("A", "a:1"),
            Member::new("B", "b:1"),
            Member::new("C", "c:1"),
        ];
        let assignment = policy.assign("t", "ns", "r1", &abc).unwrap();
        assert_eq!(assignment.owner.as_deref(), Some("B"));

        let ab = &abc[..2];
        let assignment = policy.assign("t", "ns", "r1", ab).unwrap();
        assert_eq!(assignment.owner.as_deref(), Some("B"));
    }

    #[test]
    fn ties_go_to_smallest_id() {
        let policy = RendezvousPolicy::with_weight_fn(|_, _| 7);
        let members = vec![
            Member::new("worker-2", "c"),
            Member::new("worker-0", "a"),
            Member::new("worker-1", "b"),
        ];
        let assignment = policy.assign("t", "ns", "r1", &members).unwrap();
        assert_eq!(assignment.owner.as_deref(), Some("worker-0"));
    }

    #[test]
    fn channel_is_derived_from_resource() {
        let policy = RendezvousPolicy::new();
        let assignment = policy
            .assign("tenant-a", "ns-b", "collection-1", &members(3))
            .unwrap();
        assert_eq!(assignment.channel, "persistent://tenant-a/ns-b/collection-1");
    }

    #[test]
    fn deterministic_and_order_independent() {
        let policy = RendezvousPolicy::new();
        let forward = members(5);
        let mut backward = forward.clone();
        backward.reverse();
        assert_eq!(owners(&policy, &forward, 200), owners(&policy, &forward, 200));
        assert_eq!(owners(&policy, &forward, 200), owners(&policy, &backward, 200));
    }

    #[test]
    fn removal_only_moves_resources_of_removed_member() {
        let policy = RendezvousPolicy::new();
        let before = members(5);
        let mut after = before.clone();
        let removed = after.remove(2);

        let old = owners(&policy, &before, 5_000);
        let new = owners(&policy, &after, 5_000);

        for (key, old_owner) in &old {
            if *old_owner != removed.id {
                assert_eq!(
                    &new[key], old_owner,
                    "collection-{key} moved although its owner stayed"
                );
            } else {
                assert_ne!(new[key], removed.id);
            }
        }
    }

    #[test]
    fn addition_moves_about_one_over_n_plus_one() {
        let policy = RendezvousPolicy::new();
        let before = members(4);
        let after = members(5);
        let total = 10_000u32;

        let old = owners(&policy, &before, total);
        let new = owners(&policy, &after, total);

        let mut moved = 0;
        for (key, old_owner) in &old {
            if &new[key] != old_owner {
                assert_eq!(new[key], "worker-4", "keys only move onto the newcomer");
                moved += 1;
            }
        }

        let moved_pct = f64::from(moved) / f64::from(total);
        let expected_pct = 1.0 / 5.0;
        assert!(
            (moved_pct - expected_pct).abs() < 0.05,
            "moved {moved_pct:.2}, expected ~{expected_pct:.2}"
        );
    }

    #[test]
    fn distribution_is_roughly_even() {
        let policy = RendezvousPolicy::new();
        let members = members(5);
        let mut counts: HashMap<String, u32> = HashMap::new();
        for owner in owners(&policy, &members, 10_000).into_values() {
            *counts.entry(owner).or_default() += 1;
        }
        assert_eq!(counts.len(), 5);
        for (member, count) in counts {
            let deviation = (f64::from(count) - 2000.0).abs() / 2000.0;
            assert!(
                deviation < 0.1,
                "{member} owns {count} resources (deviation {deviation:.2})"
            );
        }
    }
}
