use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// A search-result row, before its detail page has been fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    /// Site-local id or profile URL.
    pub source_id: String,
    pub name: String,
    pub firm_guess: Option<String>,
    /// Present only on sites that show email addresses in the result list.
    pub email: Option<String>,
}

impl RawCandidate {
    pub fn new(source_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            name: name.into(),
            firm_guess: None,
            email: None,
        }
    }

    pub fn with_firm(mut self, firm: impl Into<String>) -> Self {
        self.firm_guess = Some(firm.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Fields recovered from a contact's detail page or vCard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactDetail {
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub firm_name: String,
    pub phone: String,
    pub website: String,
    pub city: String,
    pub state: String,
    pub practice_areas: Vec<String>,
    pub member_url: Option<String>,
}

/// The persisted unit. `email` is normalized and unique across all sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactRecord {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub firm_name: String,
    pub phone: String,
    pub website: String,
    pub practice_areas: Vec<String>,
    pub city: String,
    pub state: String,
    pub source: String,
    pub source_ref: String,
    pub member_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Clean a scraped email: strip whitespace, keep the first of a list, lowercase,
/// and reject anything that does not look like `local@domain.tld`.
pub fn clean_email(raw: &str) -> Option<String> {
    let collapsed = WHITESPACE_RE.replace_all(raw.trim(), "");
    let first = collapsed
        .split([';', ','])
        .next()
        .unwrap_or("")
        .trim()
        .trim_start_matches("mailto:")
        .to_lowercase();
    if EMAIL_RE.is_match(&first) {
        Some(first)
    } else {
        None
    }
}

const STATE_NAMES: &[(&str, &str)] = &[
    ("alabama", "AL"),
    ("alaska", "AK"),
    ("arizona", "AZ"),
    ("arkansas", "AR"),
    ("california", "CA"),
    ("colorado", "CO"),
    ("connecticut", "CT"),
    ("delaware", "DE"),
    ("florida", "FL"),
    ("georgia", "GA"),
    ("hawaii", "HI"),
    ("idaho", "ID"),
    ("illinois", "IL"),
    ("indiana", "IN"),
    ("iowa", "IA"),
    ("kansas", "KS"),
    ("kentucky", "KY"),
    ("louisiana", "LA"),
    ("maine", "ME"),
    ("maryland", "MD"),
    ("massachusetts", "MA"),
    ("michigan", "MI"),
    ("minnesota", "MN"),
    ("mississippi", "MS"),
    ("missouri", "MO"),
    ("montana", "MT"),
    ("nebraska", "NE"),
    ("nevada", "NV"),
    ("new hampshire", "NH"),
    ("new jersey", "NJ"),
    ("new mexico", "NM"),
    ("new york", "NY"),
    ("north carolina", "NC"),
    ("north dakota", "ND"),
    ("ohio", "OH"),
    ("oklahoma", "OK"),
    ("oregon", "OR"),
    ("pennsylvania", "PA"),
    ("rhode island", "RI"),
    ("south carolina", "SC"),
    ("south dakota", "SD"),
    ("tennessee", "TN"),
    ("texas", "TX"),
    ("utah", "UT"),
    ("vermont", "VT"),
    ("virginia", "VA"),
    ("washington", "WA"),
    ("west virginia", "WV"),
    ("wisconsin", "WI"),
    ("wyoming", "WY"),
    ("district of columbia", "DC"),
    ("washington dc", "DC"),
    ("washington d.c.", "DC"),
    ("d.c.", "DC"),
];

/// Normalize a state name or abbreviation to its two-letter code.
pub fn normalize_state(raw: &str, default_state: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return default_state.to_string();
    }
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return trimmed.to_ascii_uppercase();
    }

    // "N. Carolina" / "N Carolina" → "north carolina"
    let lower = trimmed.to_lowercase();
    let expanded = expand_direction(&lower);

    STATE_NAMES
        .iter()
        .find(|(name, _)| *name == lower || *name == expanded)
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| {
            if default_state.is_empty() {
                trimmed.to_string()
            } else {
                default_state.to_string()
            }
        })
}

fn expand_direction(lower: &str) -> String {
    let mut parts = lower.splitn(2, ' ');
    let head = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();
    let word = match head.trim_end_matches('.') {
        "n" => "north",
        "s" => "south",
        "w" => "west",
        _ => return lower.to_string(),
    };
    // "n. hampshire", "n. jersey", ... are "new", not "north"
    let word = match rest {
        "hampshire" | "jersey" | "mexico" | "york" => "new",
        _ => word,
    };
    format!("{} {}", word, rest)
}

const HONORIFICS: &[&str] = &["mr.", "mrs.", "ms.", "dr.", "hon.", "mr", "mrs", "ms", "dr"];
const SUFFIXES: &[&str] = &["jr.", "jr", "sr.", "sr", "ii", "iii", "iv", "esq.", "esq"];

/// Split a display name into (first, last), dropping honorifics and suffixes.
/// Handles "Last, First Middle" as well as "First Middle Last".
pub fn split_name(full: &str) -> (String, String) {
    let full = full.trim();
    if let Some((last, rest)) = full.split_once(',') {
        let rest_first = rest
            .split_whitespace()
            .find(|p| !is_affix(p))
            .unwrap_or("")
            .to_string();
        if !rest_first.is_empty() {
            return (rest_first, last.trim().to_string());
        }
    }

    let parts: Vec<&str> = full
        .split_whitespace()
        .map(|p| p.trim_end_matches(','))
        .filter(|p| !is_affix(p))
        .collect();
    match parts.as_slice() {
        [] => (String::new(), String::new()),
        [only] => (only.to_string(), String::new()),
        [first, .., last] => (first.to_string(), last.to_string()),
    }
}

fn is_affix(part: &str) -> bool {
    let p = part.to_lowercase();
    HONORIFICS.contains(&p.as_str()) || SUFFIXES.contains(&p.as_str())
}
