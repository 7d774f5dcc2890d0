#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bar_scraper::partition::Refinement;
use bar_scraper::{
    AdapterError, ContactDetail, DimensionSpec, PartitionKey, Partitioner, RawCandidate, RunNotifier,
    RunSummary, SearchPage, SiteAdapter,
};

pub const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone)]
pub struct Person {
    pub id: String,
    pub first: String,
    pub last: String,
    pub firm: String,
    pub email: String,
}

impl Person {
    pub fn new(id: impl Into<String>, last: &str) -> Self {
        Self {
            id: id.into(),
            first: "Pat".into(),
            last: last.to_string(),
            firm: format!("{} Law Group", last),
            email: format!("pat.{}@lawfirm.example", last.to_lowercase()),
        }
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = email.to_string();
        self
    }

    pub fn with_firm(mut self, firm: &str) -> Self {
        self.firm = firm.to_string();
        self
    }
}

/// In-process directory searchable by last-name prefix. Like the real sites it
/// never returns more than `cap` rows for one query and reports the truncated
/// count as the total.
pub struct SyntheticSite {
    pub site: String,
    pub people: Vec<Person>,
    pub cap: usize,
    pub page_size: usize,
    /// Put emails in the result rows.
    pub list_emails: bool,
    /// Prefixes whose search fails with a transient error.
    pub failing_prefixes: Mutex<HashSet<String>>,
    /// Detail fetches for these ids return a parse error.
    pub broken_details: HashSet<String>,
    /// After this many detail fetches, every further fetch never completes.
    pub hang_after_details: Option<usize>,
    pub search_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
}

impl SyntheticSite {
    pub fn new(site: &str, people: Vec<Person>, cap: usize) -> Self {
        Self {
            site: site.to_string(),
            people,
            cap,
            page_size: 25,
            list_emails: false,
            failing_prefixes: Mutex::new(HashSet::new()),
            broken_details: HashSet::new(),
            hang_after_details: None,
            search_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_prefix(&self, prefix: &str) {
        self.failing_prefixes.lock().unwrap().insert(prefix.to_string());
    }

    pub fn heal(&self) {
        self.failing_prefixes.lock().unwrap().clear();
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    fn matching(&self, prefix: &str) -> Vec<&Person> {
        let prefix = prefix.to_lowercase();
        self.people
            .iter()
            .filter(|p| p.last.to_lowercase().starts_with(&prefix))
            .take(self.cap)
            .collect()
    }
}

#[async_trait]
impl SiteAdapter for SyntheticSite {
    fn site(&self) -> &str {
        &self.site
    }

    async fn search(&self, key: &PartitionKey, page: u32) -> Result<SearchPage, AdapterError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let prefix = key.get("prefix").unwrap_or("");
        if self.failing_prefixes.lock().unwrap().contains(prefix) {
            return Err(AdapterError::Transient(format!("timeout searching {}", prefix)));
        }

        let visible = self.matching(prefix);
        let start = (page as usize - 1) * self.page_size;
        let end = (start + self.page_size).min(visible.len());
        let rows = if start < end { &visible[start..end] } else { &[][..] };

        Ok(SearchPage {
            candidates: rows
                .iter()
                .map(|p| {
                    let c = RawCandidate::new(p.id.clone(), format!("{} {}", p.first, p.last))
                        .with_firm(p.firm.clone());
                    if self.list_emails {
                        c.with_email(p.email.clone())
                    } else {
                        c
                    }
                })
                .collect(),
            total_count: Some(visible.len() as u32),
            has_next_page: end < visible.len(),
        })
    }

    async fn fetch_detail(&self, candidate: &RawCandidate) -> Result<ContactDetail, AdapterError> {
        let n = self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_after_details.is_some_and(|k| n >= k) {
            return std::future::pending().await;
        }
        if self.broken_details.contains(&candidate.source_id) {
            return Err(AdapterError::Parse(format!("no vcard for {}", candidate.source_id)));
        }
        let person = self
            .people
            .iter()
            .find(|p| p.id == candidate.source_id)
            .ok_or_else(|| AdapterError::NotFound(candidate.source_id.clone()))?;
        Ok(ContactDetail {
            email: Some(person.email.clone()),
            first_name: person.first.clone(),
            last_name: person.last.clone(),
            firm_name: person.firm.clone(),
            state: "Kentucky".into(),
            ..ContactDetail::default()
        })
    }
}

/// Reports the cap for every query and lists nobody.
pub struct AlwaysCapped {
    pub site: String,
    pub cap: u32,
    search_calls: AtomicUsize,
}

impl AlwaysCapped {
    pub fn new(site: &str, cap: u32) -> Self {
        Self {
            site: site.to_string(),
            cap,
            search_calls: AtomicUsize::new(0),
        }
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SiteAdapter for AlwaysCapped {
    fn site(&self) -> &str {
        &self.site
    }

    async fn search(&self, _key: &PartitionKey, _page: u32) -> Result<SearchPage, AdapterError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SearchPage {
            candidates: Vec::new(),
            total_count: Some(self.cap),
            has_next_page: false,
        })
    }

    async fn fetch_detail(&self, candidate: &RawCandidate) -> Result<ContactDetail, AdapterError> {
        Err(AdapterError::NotFound(candidate.source_id.clone()))
    }
}

/// Seeds `Aa`..`Az`, extended one lowercase letter per level.
pub fn a_prefixes(max_depth: u8) -> Partitioner {
    Partitioner::new(DimensionSpec {
        seed_dimension: "prefix".into(),
        seed_values: LOWER.chars().map(|c| format!("A{}", c)).collect(),
        seed_prefix_alphabet: None,
        refinements: vec![Refinement::Extend {
            dimension: "prefix".into(),
            alphabet: LOWER.into(),
        }],
        max_depth,
    })
}

pub fn prefixes(seeds: &[&str], max_depth: u8) -> Partitioner {
    prefixes_over(seeds, LOWER, max_depth)
}

pub fn prefixes_over(seeds: &[&str], alphabet: &str, max_depth: u8) -> Partitioner {
    Partitioner::new(DimensionSpec {
        seed_dimension: "prefix".into(),
        seed_values: seeds.iter().map(|s| s.to_string()).collect(),
        seed_prefix_alphabet: None,
        refinements: vec![Refinement::Extend {
            dimension: "prefix".into(),
            alphabet: alphabet.into(),
        }],
        max_depth,
    })
}

/// `n` people whose last names start with `prefix`.
pub fn people_with_prefix(prefix: &str, n: usize) -> Vec<Person> {
    (0..n)
        .map(|i| Person::new(format!("{}-{}", prefix, i), &format!("{}ton{}", prefix, i)))
        .collect()
}

/// `n` people under `prefix`, spread evenly over the 26 one-letter extensions.
pub fn people_spread(prefix: &str, n: usize) -> Vec<Person> {
    let letters: Vec<char> = LOWER.chars().collect();
    (0..n)
        .map(|i| {
            let last = format!("{}{}ell{}", prefix, letters[i % letters.len()], i);
            Person::new(format!("{}-{}", prefix, i), &last)
        })
        .collect()
}

/// Keeps every summary it is handed.
#[derive(Clone, Default)]
pub struct CapturingNotifier {
    pub summaries: Arc<Mutex<Vec<RunSummary>>>,
}

impl CapturingNotifier {
    pub fn count(&self) -> usize {
        self.summaries.lock().unwrap().len()
    }
}

#[async_trait]
impl RunNotifier for CapturingNotifier {
    async fn notify(&self, summary: &RunSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }
}
