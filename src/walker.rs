use std::pin::Pin;

use async_stream::stream;
use futures::Stream;
use tracing::debug;

use crate::adapter::SiteAdapter;
use crate::contact::RawCandidate;
use crate::error::AdapterError;
use crate::partition::PartitionKey;
use crate::rate_limit::RateLimiter;

/// Hard stop for sites that keep claiming a next page.
pub const DEFAULT_MAX_PAGES: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEvent {
    Page {
        page: u32,
        total_count: Option<u32>,
        rows: usize,
    },
    Candidate(RawCandidate),
    /// Always the last item of a walk that did not fail.
    Finished(WalkOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalkOutcome {
    pub pages: u32,
    pub candidates: u32,
    /// Largest total the site reported on any page.
    pub total_count: Option<u32>,
    /// The walk ended after page 1 because the site reported the cap.
    pub stopped_at_cap: bool,
}

impl WalkOutcome {
    /// Result count used for cap detection. Falls back to rows seen when the
    /// site does not print a total.
    pub fn observed_count(&self) -> u32 {
        self.total_count.unwrap_or(0).max(self.candidates)
    }

    pub fn hit_cap(&self, cap: u32) -> bool {
        self.observed_count() >= cap
    }
}

pub type WalkStream<'a> = Pin<Box<dyn Stream<Item = Result<WalkEvent, AdapterError>> + Send + 'a>>;

/// Pages through one partition. Every walk starts at page 1; there is no
/// mid-partition resume.
pub struct PageWalker<'a> {
    adapter: &'a dyn SiteAdapter,
    limiter: &'a RateLimiter,
    cap: u32,
    max_pages: u32,
}

impl<'a> PageWalker<'a> {
    pub fn new(adapter: &'a dyn SiteAdapter, limiter: &'a RateLimiter, cap: u32) -> Self {
        Self {
            adapter,
            limiter,
            cap,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Lazily walk `key`. With `stop_at_cap`, a first page reporting a total at
    /// or above the cap ends the walk before any candidate is yielded, since
    /// the partition will be subdivided anyway.
    ///
    /// A failed search yields one `Err` and ends the stream.
    pub fn walk(&self, key: &PartitionKey, stop_at_cap: bool) -> WalkStream<'a> {
        let adapter = self.adapter;
        let limiter = self.limiter;
        let cap = self.cap;
        let max_pages = self.max_pages;
        let key = key.clone();

        Box::pin(stream! {
            let mut outcome = WalkOutcome::default();
            let mut page = 1u32;

            loop {
                limiter.wait().await;
                let result = match adapter.search(&key, page).await {
                    Ok(r) => r,
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                };

                outcome.pages = page;
                if let Some(total) = result.total_count {
                    outcome.total_count = Some(outcome.total_count.map_or(total, |t| t.max(total)));
                }
                debug!(
                    partition = %key,
                    page,
                    total_count = ?result.total_count,
                    rows = result.candidates.len(),
                    "search page"
                );
                yield Ok(WalkEvent::Page {
                    page,
                    total_count: result.total_count,
                    rows: result.candidates.len(),
                });

                if stop_at_cap && page == 1 && result.total_count.is_some_and(|t| t >= cap) {
                    outcome.stopped_at_cap = true;
                    break;
                }

                let empty = result.candidates.is_empty();
                for candidate in result.candidates {
                    outcome.candidates += 1;
                    yield Ok(WalkEvent::Candidate(candidate));
                }

                if !result.has_next_page || empty || page >= max_pages {
                    break;
                }
                page += 1;
            }

            yield Ok(WalkEvent::Finished(outcome));
        })
    }
}
