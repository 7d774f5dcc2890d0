use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use indicatif::ProgressBar;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::adapter::SiteAdapter;
use crate::config::SiteConfig;
use crate::contact::RawCandidate;
use crate::dedup::{Deduper, Identity};
use crate::error::{AdapterError, StoreError};
use crate::gov_filter::{government_category, is_government_contact};
use crate::ingest::{IngestOutcome, Ingestor};
use crate::partition::{PartitionKey, PartitionState, PartitionStatus, Partitioner, NOTE_SUPERSEDED};
use crate::rate_limit::RateLimiter;
use crate::store::{ContactStore, ProgressStore};
use crate::summary::{LogNotifier, RunNotifier, RunSummary, StopReason};
use crate::walker::{PageWalker, WalkEvent};

/// Lock hold for a run with no runtime budget. Past it, the lock is assumed
/// to belong to a run that died.
pub const LOCK_STALE_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

/// Added to `max_runtime` for the lock hold, since the last partition may
/// overrun the budget.
pub const LOCK_GRACE: Duration = Duration::from_secs(15 * 60);

/// Per-invocation budgets and switches. `None` means unbounded.
#[derive(Debug, Clone, Default)]
pub struct RunParams {
    /// Stop once this many new contacts were inserted. Checked between partitions.
    pub max_attorneys: Option<usize>,
    pub max_partitions: Option<usize>,
    pub max_runtime: Option<Duration>,
    /// Log only; nothing is written to either store.
    pub dry_run: bool,
    /// Clear the site's partition state and re-seed.
    pub reset_progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Seeding,
    Processing,
    Drained,
}

/// Drives one bounded run against one site.
pub struct RunCoordinator<'a> {
    adapter: &'a dyn SiteAdapter,
    contacts: &'a dyn ContactStore,
    progress: &'a dyn ProgressStore,
    partitioner: Partitioner,
    cap: u32,
    default_state: String,
    practice_area_dimension: Option<String>,
    limiter: RateLimiter,
    notifier: Box<dyn RunNotifier>,
    bar: ProgressBar,
    owner: String,
    lock_stale_after: Duration,
    lock_grace: Duration,
}

impl<'a> RunCoordinator<'a> {
    pub fn new(
        adapter: &'a dyn SiteAdapter,
        contacts: &'a dyn ContactStore,
        progress: &'a dyn ProgressStore,
        partitioner: Partitioner,
        cap: u32,
    ) -> Self {
        Self {
            adapter,
            contacts,
            progress,
            partitioner,
            cap,
            default_state: String::new(),
            practice_area_dimension: None,
            limiter: RateLimiter::unlimited(),
            notifier: Box::new(LogNotifier),
            bar: ProgressBar::hidden(),
            owner: format!("pid-{}", std::process::id()),
            lock_stale_after: LOCK_STALE_AFTER,
            lock_grace: LOCK_GRACE,
        }
    }

    pub fn from_config(
        config: &SiteConfig,
        adapter: &'a dyn SiteAdapter,
        contacts: &'a dyn ContactStore,
        progress: &'a dyn ProgressStore,
    ) -> Self {
        let mut c = Self::new(
            adapter,
            contacts,
            progress,
            Partitioner::new(config.dimensions.clone()),
            config.cap,
        )
        .with_rate_limiter(RateLimiter::new(config.min_delay()).with_jitter(config.jitter_pct))
        .with_default_state(&config.default_state);
        c.practice_area_dimension = config.practice_area_dimension.clone();
        c
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_default_state(mut self, state: &str) -> Self {
        self.default_state = state.to_string();
        self
    }

    pub fn with_practice_area_dimension(mut self, dimension: &str) -> Self {
        self.practice_area_dimension = Some(dimension.to_string());
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn RunNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_progress_bar(mut self, bar: ProgressBar) -> Self {
        self.bar = bar;
        self
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.owner = owner.to_string();
        self
    }

    pub fn with_lock_stale_after(mut self, stale_after: Duration) -> Self {
        self.lock_stale_after = stale_after;
        self
    }

    pub fn with_lock_grace(mut self, grace: Duration) -> Self {
        self.lock_grace = grace;
        self
    }

    /// How long this run's lock is honored by other runs.
    fn lock_hold(&self, params: &RunParams) -> Duration {
        params
            .max_runtime
            .map_or(self.lock_stale_after, |runtime| runtime + self.lock_grace)
    }

    fn site(&self) -> &str {
        self.adapter.site()
    }

    fn enter(&self, phase: Phase) {
        debug!(site = %self.site(), ?phase, "run phase");
    }

    /// Run until the budget or the partition space is exhausted. Never fails:
    /// every problem ends up in `RunSummary::errors`.
    pub async fn run(&self, params: &RunParams) -> RunSummary {
        let mut summary = RunSummary::new(self.site(), params.dry_run);
        self.enter(Phase::Init);
        info!(
            site = %self.site(),
            dry_run = params.dry_run,
            max_attorneys = ?params.max_attorneys,
            max_partitions = ?params.max_partitions,
            "run starting"
        );

        let locked = if params.dry_run {
            false
        } else {
            match self.progress.try_lock(self.site(), &self.owner, self.lock_hold(params)) {
                Ok(true) => true,
                Ok(false) => {
                    summary.error(format!("{} is locked by another run", self.site()));
                    summary.stop_reason = Some(StopReason::Locked);
                    return self.finish(summary).await;
                }
                Err(e) => {
                    summary.error(format!("cannot take site lock: {}", e));
                    summary.stop_reason = Some(StopReason::StoreUnavailable);
                    return self.finish(summary).await;
                }
            }
        };

        match self.load_queue(params) {
            Ok(queue) => self.process(queue, params, &mut summary).await,
            Err(e) => {
                summary.error(format!("progress store unavailable: {}", e));
                summary.stop_reason = Some(StopReason::StoreUnavailable);
            }
        }

        if locked {
            if let Err(e) = self.progress.unlock(self.site(), &self.owner) {
                summary.error(format!("cannot release site lock: {}", e));
            }
        }
        self.finish(summary).await
    }

    async fn finish(&self, mut summary: RunSummary) -> RunSummary {
        self.enter(Phase::Drained);
        summary.finished = Utc::now();
        if !summary.dry_run {
            if let Err(e) = self.progress.record_run(&summary) {
                summary.error(format!("cannot record run: {}", e));
            }
        }
        self.bar.finish_and_clear();
        self.notifier.notify(&summary).await;
        summary
    }

    // ── INIT / SEEDING ──

    fn load_queue(&self, params: &RunParams) -> Result<VecDeque<PartitionState>, StoreError> {
        let site = self.site();
        let dry_run = params.dry_run;

        if params.reset_progress {
            if dry_run {
                info!(site, "[dry run] would reset partition progress");
            } else {
                let removed = self.progress.reset(site)?;
                info!(site, removed, "partition progress reset");
            }
        }

        if !dry_run {
            let reclaimed = self.progress.reclaim_in_progress(site)?;
            if reclaimed > 0 {
                info!(site, reclaimed, "reclaimed partitions left in progress");
            }
        }

        let seeded = !(params.reset_progress && dry_run) && self.progress.has_partitions(site)?;
        if !seeded {
            self.enter(Phase::Seeding);
            let seeds = self.partitioner.seed();
            info!(site, count = seeds.len(), "seeding partition space");
            let mut queue = VecDeque::with_capacity(seeds.len());
            for key in seeds {
                let state = PartitionState::pending(key);
                if !dry_run {
                    self.progress.upsert(site, &state)?;
                }
                queue.push_back(state);
            }
            return Ok(queue);
        }

        let pending = self.progress.load_pending(site)?;
        info!(site, pending = pending.len(), "resuming");
        Ok(pending
            .into_iter()
            .map(|mut s| {
                s.status = PartitionStatus::Pending;
                s
            })
            .collect())
    }

    // ── PROCESSING ──

    async fn process(&self, mut queue: VecDeque<PartitionState>, params: &RunParams, summary: &mut RunSummary) {
        self.enter(Phase::Processing);
        let started = Instant::now();
        let mut deduper = Deduper::new(self.contacts, self.site(), !params.dry_run);
        let ingestor = Ingestor::new(self.contacts, self.site(), &self.default_state, params.dry_run);
        let mut queued: HashSet<PartitionKey> = queue.iter().map(|s| s.key.clone()).collect();
        let mut attempted = 0usize;

        self.bar.set_length(queue.len() as u64);

        while let Some(state) = queue.pop_front() {
            if let Some(reason) = self.budget_exhausted(params, summary, started, attempted) {
                info!(site = %self.site(), ?reason, remaining = queue.len() + 1, "run budget exhausted");
                summary.stop_reason = Some(reason);
                break;
            }
            attempted += 1;
            self.bar.set_message(state.key.to_string());

            let children = self
                .process_partition(state, &mut deduper, &ingestor, params, summary)
                .await;
            for child in children {
                if queued.insert(child.clone()) {
                    queue.push_back(PartitionState::pending(child));
                    self.bar.inc_length(1);
                }
            }
            self.bar.inc(1);
        }

        if summary.stop_reason.is_none() {
            summary.stop_reason = Some(StopReason::Exhausted);
            summary.crawl_complete = summary.partitions_failed == 0;
            if summary.crawl_complete {
                info!(site = %self.site(), "crawl complete");
            }
        }
    }

    fn budget_exhausted(
        &self,
        params: &RunParams,
        summary: &RunSummary,
        started: Instant,
        attempted: usize,
    ) -> Option<StopReason> {
        if params.max_attorneys.is_some_and(|max| summary.contacts_inserted >= max) {
            return Some(StopReason::MaxAttorneys);
        }
        if params.max_partitions.is_some_and(|max| attempted >= max) {
            return Some(StopReason::MaxPartitions);
        }
        if params.max_runtime.is_some_and(|max| started.elapsed() >= max) {
            return Some(StopReason::MaxRuntime);
        }
        None
    }

    /// Walk one partition and checkpoint the result. Returns the children to
    /// enqueue when it was subdivided.
    async fn process_partition(
        &self,
        mut state: PartitionState,
        deduper: &mut Deduper<'_>,
        ingestor: &Ingestor<'_>,
        params: &RunParams,
        summary: &mut RunSummary,
    ) -> Vec<PartitionKey> {
        let site = self.site();
        let key = state.key.clone();

        state.status = PartitionStatus::InProgress;
        if !params.dry_run {
            if let Err(e) = self.progress.upsert(site, &state) {
                return self.abandon(state, format!("cannot checkpoint: {}", e), params, summary);
            }
        }

        let practice_area = self
            .practice_area_dimension
            .as_deref()
            .and_then(|d| key.get(d))
            .map(str::to_string);

        let can_subdivide = self.partitioner.can_subdivide(&key);
        let walker = PageWalker::new(self.adapter, &self.limiter, self.cap);
        let mut events = walker.walk(&key, can_subdivide);
        let mut outcome = None;

        while let Some(event) = events.next().await {
            let failure = match event {
                Ok(WalkEvent::Page { .. }) => None,
                Ok(WalkEvent::Candidate(candidate)) => {
                    summary.contacts_found += 1;
                    self.handle_candidate(&candidate, deduper, ingestor, practice_area.as_deref(), summary)
                        .await
                        .err()
                }
                Ok(WalkEvent::Finished(o)) => {
                    outcome = Some(o);
                    None
                }
                Err(e) => Some(e),
            };
            if let Some(e) = failure {
                return self.abandon(state, e.to_string(), params, summary);
            }
        }

        let Some(outcome) = outcome else {
            return self.abandon(state, "walk ended early".into(), params, summary);
        };

        let mut fresh = Vec::new();

        if outcome.hit_cap(self.cap) {
            let children = self.partitioner.subdivide(&key);
            if children.is_empty() {
                warn!(
                    site,
                    partition = %key,
                    result_count = outcome.observed_count(),
                    cap = self.cap,
                    "partition capped at max depth; results beyond the cap are not reachable"
                );
                state.status = PartitionStatus::Capped;
                summary.partitions_capped += 1;
            } else {
                info!(
                    site,
                    partition = %key,
                    result_count = outcome.observed_count(),
                    children = children.len(),
                    "cap reached, subdividing"
                );
                if params.dry_run {
                    fresh = children.clone();
                } else {
                    // Children already tracked keep their state and are not walked again.
                    for child in &children {
                        match self.progress.insert_pending(site, child) {
                            Ok(true) => fresh.push(child.clone()),
                            Ok(false) => debug!(site, partition = %child, "child already tracked"),
                            Err(e) => {
                                let reason = format!("cannot store child {}: {}", child, e);
                                return self.abandon(state, reason, params, summary);
                            }
                        }
                    }
                }
                state.status = PartitionStatus::Done;
                state.note = Some(NOTE_SUPERSEDED.to_string());
                state.children = children;
                summary.partitions_subdivided += 1;
            }
        } else {
            state.status = PartitionStatus::Done;
        }
        state.result_count = Some(outcome.observed_count());

        if !params.dry_run {
            if let Err(e) = self.progress.upsert(site, &state) {
                summary.error(format!("partition {}: cannot checkpoint: {}", key, e));
                summary.partitions_failed += 1;
                return fresh;
            }
        }

        summary.partitions_processed += 1;
        debug!(
            site,
            partition = %key,
            status = state.status.as_str(),
            pages = outcome.pages,
            candidates = outcome.candidates,
            "partition finished"
        );
        fresh
    }

    /// Record a failed partition and put it back to `pending` for the next run.
    fn abandon(
        &self,
        mut state: PartitionState,
        reason: String,
        params: &RunParams,
        summary: &mut RunSummary,
    ) -> Vec<PartitionKey> {
        summary.error(format!("partition {}: {}", state.key, reason));
        summary.partitions_failed += 1;
        if !params.dry_run {
            state.status = PartitionStatus::Pending;
            if let Err(e) = self.progress.upsert(self.site(), &state) {
                warn!(site = %self.site(), partition = %state.key, "cannot return partition to pending: {}", e);
            }
        }
        Vec::new()
    }

    /// Filter, dedupe, enrich and ingest one candidate. Only a transient fetch
    /// failure is returned; it aborts the partition.
    async fn handle_candidate(
        &self,
        candidate: &RawCandidate,
        deduper: &mut Deduper<'_>,
        ingestor: &Ingestor<'_>,
        practice_area: Option<&str>,
        summary: &mut RunSummary,
    ) -> Result<(), AdapterError> {
        let site = self.site();
        let mut identities = Identity::for_candidate(site, candidate);

        match deduper.any_known(&identities) {
            Ok(true) => {
                summary.contacts_deduped += 1;
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                summary.error(format!("dedup check for {}: {}", candidate.source_id, e));
                summary.contacts_skipped += 1;
                return Ok(());
            }
        }

        let list_email = candidate.email.as_deref().unwrap_or("");
        let list_firm = candidate.firm_guess.as_deref().unwrap_or("");
        if is_government_contact(list_email, list_firm) {
            debug!(
                site,
                candidate = %candidate.name,
                category = government_category(list_email, list_firm).unwrap_or("other_govt"),
                "government contact filtered before detail fetch"
            );
            summary.contacts_filtered += 1;
            self.remember(deduper, &identities, summary);
            return Ok(());
        }

        self.limiter.wait().await;
        summary.detail_fetches += 1;
        let detail = match self.adapter.fetch_detail(candidate).await {
            Ok(d) => d,
            Err(e) if e.is_transient() => return Err(e),
            Err(e @ AdapterError::NotFound(_)) => {
                debug!(site, candidate = %candidate.source_id, "{}", e);
                summary.contacts_skipped += 1;
                self.remember(deduper, &identities, summary);
                return Ok(());
            }
            Err(e) => {
                summary.error(format!("detail {}: {}", candidate.source_id, e));
                summary.contacts_skipped += 1;
                return Ok(());
            }
        };

        match ingestor.ingest(candidate, &detail, practice_area) {
            Ok(IngestOutcome::Inserted(email)) => {
                summary.contacts_inserted += 1;
                identities.push(Identity::Email(email));
            }
            Ok(IngestOutcome::Duplicate(email)) => {
                summary.contacts_deduped += 1;
                identities.push(Identity::Email(email));
            }
            Ok(IngestOutcome::Government(_)) => summary.contacts_filtered += 1,
            Ok(IngestOutcome::NoEmail) => summary.contacts_skipped += 1,
            Err(e) => {
                summary.error(format!("ingest {}: {}", candidate.source_id, e));
                summary.contacts_skipped += 1;
                return Ok(());
            }
        }
        self.remember(deduper, &identities, summary);
        Ok(())
    }

    fn remember(&self, deduper: &mut Deduper<'_>, identities: &[Identity], summary: &mut RunSummary) {
        if let Err(e) = deduper.mark_all(identities) {
            summary.error(format!("cannot remember identities: {}", e));
        }
    }
}
