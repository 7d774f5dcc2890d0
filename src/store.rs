use std::time::Duration;

use crate::contact::ContactRecord;
use crate::error::StoreError;
use crate::partition::{PartitionKey, PartitionState, PartitionStatus};
use crate::summary::RunSummary;

/// Persisted contacts plus remembered dedup identities.
pub trait ContactStore {
    fn exists(&self, email: &str) -> Result<bool, StoreError>;

    /// Insert unless the email is already present. Returns whether a row was written.
    fn insert(&self, record: &ContactRecord) -> Result<bool, StoreError>;

    fn is_known(&self, identity: &str) -> Result<bool, StoreError>;

    fn remember(&self, identity: &str, source: &str) -> Result<(), StoreError>;
}

/// Durable partition checkpoints, keyed by `(site, partition key)`.
/// Single writer per site; see `try_lock`.
pub trait ProgressStore {
    /// Pending and in-progress partitions in discovery order.
    fn load_pending(&self, site: &str) -> Result<Vec<PartitionState>, StoreError>;

    fn has_partitions(&self, site: &str) -> Result<bool, StoreError>;

    fn load(&self, site: &str, key: &PartitionKey) -> Result<Option<PartitionState>, StoreError>;

    fn upsert(&self, site: &str, state: &PartitionState) -> Result<(), StoreError>;

    /// Store `key` as pending unless the site already tracks it. Returns
    /// whether a row was written.
    fn insert_pending(&self, site: &str, key: &PartitionKey) -> Result<bool, StoreError>;

    /// Drop every partition of `site`. Returns rows removed.
    fn reset(&self, site: &str) -> Result<usize, StoreError>;

    /// Flip partitions left `in_progress` by an interrupted run back to `pending`.
    fn reclaim_in_progress(&self, site: &str) -> Result<usize, StoreError>;

    fn status_counts(&self, site: &str) -> Result<Vec<(PartitionStatus, usize)>, StoreError>;

    /// Advisory lock held until `hold_for` from now. Another owner's lock is
    /// taken over once it has expired.
    fn try_lock(&self, site: &str, owner: &str, hold_for: Duration) -> Result<bool, StoreError>;

    fn unlock(&self, site: &str, owner: &str) -> Result<(), StoreError>;

    fn record_run(&self, summary: &RunSummary) -> Result<(), StoreError>;
}
