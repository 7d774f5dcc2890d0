//! Resumable, rate-limited crawler for attorney directories.
//!
//! A site's search space is split into partitions that are subdivided
//! whenever a query reaches the site's result cap. Partition progress and
//! contacts live in SQLite, so a crawl spanning many bounded runs picks up
//! where the previous one stopped.

pub mod adapter;
pub mod config;
pub mod contact;
pub mod coordinator;
pub mod db;
pub mod dedup;
pub mod error;
pub mod gov_filter;
pub mod ingest;
pub mod partition;
pub mod rate_limit;
pub mod store;
pub mod summary;
pub mod walker;

pub use adapter::{SearchPage, SiteAdapter};
pub use config::SiteConfig;
pub use contact::{ContactDetail, ContactRecord, RawCandidate};
pub use coordinator::{RunCoordinator, RunParams};
pub use db::SqliteStore;
pub use error::{AdapterError, ConfigError, StoreError};
pub use gov_filter::is_government_contact;
pub use partition::{DimensionSpec, PartitionKey, PartitionState, PartitionStatus, Partitioner, Refinement};
pub use store::{ContactStore, ProgressStore};
pub use summary::{RunNotifier, RunSummary, StopReason};
