pub mod http;
pub mod obfuscation;
pub mod profile_page;
pub mod vcard_api;

use async_trait::async_trait;

use crate::contact::{ContactDetail, RawCandidate};
use crate::error::AdapterError;
use crate::partition::PartitionKey;

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub candidates: Vec<RawCandidate>,
    /// Total matches the site claims for the query, when it shows one.
    pub total_count: Option<u32>,
    pub has_next_page: bool,
}

/// Site-specific search and detail extraction. Everything that knows about a
/// particular directory's HTML, JSON, or email obfuscation lives behind this.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Short site id, stored as `ContactRecord::source`.
    fn site(&self) -> &str;

    /// Fetch results page `page` (1-based) for `key`.
    async fn search(&self, key: &PartitionKey, page: u32) -> Result<SearchPage, AdapterError>;

    /// Fetch and parse one contact's detail (profile page or vCard).
    async fn fetch_detail(&self, candidate: &RawCandidate) -> Result<ContactDetail, AdapterError>;
}

/// Map partition filters onto site query parameters. Dimensions with no
/// mapping are passed through under their own name.
pub fn query_params(
    key: &PartitionKey,
    mapping: &std::collections::BTreeMap<String, String>,
) -> Vec<(String, String)> {
    key.filters
        .iter()
        .map(|(dim, value)| {
            let param = mapping.get(dim).cloned().unwrap_or_else(|| dim.clone());
            (param, value.clone())
        })
        .collect()
}
