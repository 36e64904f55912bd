/// Reconciliation ticks, labelled by `outcome`: unchanged, updated, deferred, failed.
pub const RECONCILE_TICKS: &str = "shard_coordinator_reconcile_ticks_total";

/// Conditional memberlist writes rejected because another writer got there first.
pub const MEMBERLIST_CONFLICTS: &str = "shard_coordinator_memberlist_conflicts_total";

pub const NODE_WATCH_FAILURES: &str = "shard_coordinator_node_watch_failures_total";

/// Size of the most recently observed live member set.
pub const LIVE_MEMBERS: &str = "shard_coordinator_live_members";

pub const COLLECTIONS_CREATED: &str = "shard_coordinator_collections_created_total";
