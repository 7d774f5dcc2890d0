use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every partition is done or capped.
    Exhausted,
    MaxAttorneys,
    MaxPartitions,
    MaxRuntime,
    /// Another run holds the site lock.
    Locked,
    /// The progress store could not be read; nothing was crawled.
    StoreUnavailable,
}

/// Outcome of one run against one site. Handed to a `RunNotifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub site: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub dry_run: bool,
    pub partitions_processed: usize,
    pub partitions_capped: usize,
    pub partitions_subdivided: usize,
    pub partitions_failed: usize,
    pub contacts_found: usize,
    pub contacts_inserted: usize,
    pub contacts_deduped: usize,
    pub contacts_filtered: usize,
    pub contacts_skipped: usize,
    pub detail_fetches: usize,
    pub stop_reason: Option<StopReason>,
    pub crawl_complete: bool,
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn new(site: &str, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            site: site.to_string(),
            started: now,
            finished: now,
            dry_run,
            partitions_processed: 0,
            partitions_capped: 0,
            partitions_subdivided: 0,
            partitions_failed: 0,
            contacts_found: 0,
            contacts_inserted: 0,
            contacts_deduped: 0,
            contacts_filtered: 0,
            contacts_skipped: 0,
            detail_fetches: 0,
            stop_reason: None,
            crawl_complete: false,
            errors: Vec::new(),
        }
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        warn!(site = %self.site, "{}", msg);
        self.errors.push(msg);
    }

    pub fn subject(&self) -> String {
        format!(
            "{} scrape: {} inserted, {} deduped, {} filtered{}",
            self.site,
            self.contacts_inserted,
            self.contacts_deduped,
            self.contacts_filtered,
            if self.crawl_complete { " (crawl complete)" } else { "" }
        )
    }

    pub fn render(&self) -> String {
        let secs = (self.finished - self.started).num_seconds();
        let mut out = format!(
            "Site:        {}\n\
             Dry run:     {}\n\
             Duration:    {}s\n\
             Partitions:  {} processed, {} subdivided, {} capped, {} failed\n\
             Contacts:    {} found, {} inserted, {} deduped, {} filtered, {} skipped\n\
             Detail hits: {}\n\
             Stopped:     {:?}\n\
             Complete:    {}\n",
            self.site,
            self.dry_run,
            secs,
            self.partitions_processed,
            self.partitions_subdivided,
            self.partitions_capped,
            self.partitions_failed,
            self.contacts_found,
            self.contacts_inserted,
            self.contacts_deduped,
            self.contacts_filtered,
            self.contacts_skipped,
            self.detail_fetches,
            self.stop_reason,
            self.crawl_complete,
        );
        if !self.errors.is_empty() {
            out.push_str(&format!("Errors ({}):\n", self.errors.len()));
            for e in self.errors.iter().take(20) {
                out.push_str(&format!("  - {}\n", e));
            }
        }
        out
    }
}

/// Delivery of a finished run's summary (email, chat, file). Failures are the
/// notifier's to log; they never affect the run.
#[async_trait]
pub trait RunNotifier: Send + Sync {
    async fn notify(&self, summary: &RunSummary);
}

pub struct LogNotifier;

#[async_trait]
impl RunNotifier for LogNotifier {
    async fn notify(&self, summary: &RunSummary) {
        info!(
            site = %summary.site,
            inserted = summary.contacts_inserted,
            errors = summary.errors.len(),
            complete = summary.crawl_complete,
            "{}",
            summary.subject()
        );
    }
}

/// Writes `<dir>/<site>-scrape-summary.json`.
pub struct JsonFileNotifier {
    pub dir: PathBuf,
}

#[async_trait]
impl RunNotifier for JsonFileNotifier {
    async fn notify(&self, summary: &RunSummary) {
        let path = self.dir.join(format!("{}-scrape-summary.json", summary.site));
        let json = match serde_json::to_string_pretty(summary) {
            Ok(j) => j,
            Err(e) => {
                warn!("Failed to serialize run summary: {}", e);
                return;
            }
        };
        match tokio::fs::write(&path, json).await {
            Ok(()) => info!("Summary written to {}", path.display()),
            Err(e) => warn!("Failed to write {}: {}", path.display(), e),
        }
    }
}
