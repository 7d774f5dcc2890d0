use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Subdivision never goes deeper than this, whatever a site config asks for.
pub const HARD_MAX_DEPTH: u8 = 4;

/// One query slice: an ordered list of `dimension = value` filters plus its
/// subdivision depth (0 for seeds).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub filters: Vec<(String, String)>,
    pub depth: u8,
}

impl PartitionKey {
    pub fn seed(dimension: &str, value: &str) -> Self {
        Self {
            filters: vec![(dimension.to_string(), value.to_string())],
            depth: 0,
        }
    }

    pub fn get(&self, dimension: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|(d, _)| d == dimension)
            .map(|(_, v)| v.as_str())
    }

    fn with_filter(&self, dimension: &str, value: String) -> Self {
        let mut filters = self.filters.clone();
        match filters.iter_mut().find(|(d, _)| d == dimension) {
            Some(slot) => slot.1 = value,
            None => filters.push((dimension.to_string(), value)),
        }
        Self {
            filters,
            depth: self.depth + 1,
        }
    }
}

/// Stable text form, used as the store key: `practice_area=44&city=Louisville`.
impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .filters
            .iter()
            .map(|(d, v)| format!("{}={}", d, v))
            .collect();
        write!(f, "{}", parts.join("&"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Pending,
    InProgress,
    Done,
    Capped,
}

impl PartitionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStatus::Pending => "pending",
            PartitionStatus::InProgress => "in_progress",
            PartitionStatus::Done => "done",
            PartitionStatus::Capped => "capped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PartitionStatus::Pending),
            "in_progress" => Some(PartitionStatus::InProgress),
            "done" => Some(PartitionStatus::Done),
            "capped" => Some(PartitionStatus::Capped),
            _ => None,
        }
    }
}

pub const NOTE_SUPERSEDED: &str = "superseded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionState {
    pub key: PartitionKey,
    pub status: PartitionStatus,
    pub result_count: Option<u32>,
    pub children: Vec<PartitionKey>,
    pub note: Option<String>,
}

impl PartitionState {
    pub fn pending(key: PartitionKey) -> Self {
        Self {
            key,
            status: PartitionStatus::Pending,
            result_count: None,
            children: Vec::new(),
            note: None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        self.note.as_deref() == Some(NOTE_SUPERSEDED)
    }
}

/// How a capped partition is split one level finer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Refinement {
    /// Add a filter dimension drawn from a fixed list (e.g. city, county).
    Facet {
        dimension: String,
        values: Vec<String>,
    },
    /// Append one character to an existing dimension's value (e.g. name prefix).
    Extend { dimension: String, alphabet: String },
}

/// Per-site description of the query space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub seed_dimension: String,
    #[serde(default)]
    pub seed_values: Vec<String>,
    /// Seed with every two-letter prefix over this alphabet instead of
    /// listing `seed_values`.
    #[serde(default)]
    pub seed_prefix_alphabet: Option<String>,
    /// `refinements[d]` subdivides a key at depth `d`. A trailing `Extend`
    /// keeps applying to deeper levels.
    #[serde(default)]
    pub refinements: Vec<Refinement>,
    #[serde(default = "default_max_depth")]
    pub max_depth: u8,
}

fn default_max_depth() -> u8 {
    2
}

impl DimensionSpec {
    /// Two-letter name prefixes over `alphabet` (`AA`..`ZZ` for A–Z), extended
    /// one letter at a time on cap.
    pub fn name_prefixes(dimension: &str, alphabet: &str, max_depth: u8) -> Self {
        Self {
            seed_dimension: dimension.to_string(),
            seed_values: two_letter_prefixes(alphabet),
            seed_prefix_alphabet: None,
            refinements: vec![Refinement::Extend {
                dimension: dimension.to_string(),
                alphabet: alphabet.to_string(),
            }],
            max_depth,
        }
    }

    /// Configured seed values, with `seed_prefix_alphabet` expanded.
    pub fn seed_values(&self) -> Vec<String> {
        let mut values = self.seed_values.clone();
        if let Some(alphabet) = &self.seed_prefix_alphabet {
            values.extend(two_letter_prefixes(alphabet));
        }
        values
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seed_values().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "dimension '{}' has no seed values",
                self.seed_dimension
            )));
        }
        // A facet adds a filter; it must never replace the parent's value.
        let mut bound = vec![self.seed_dimension.as_str()];
        for r in &self.refinements {
            let empty = match r {
                Refinement::Facet { values, .. } => values.is_empty(),
                Refinement::Extend { alphabet, .. } => alphabet.is_empty(),
            };
            if empty {
                return Err(ConfigError::Invalid(format!(
                    "refinement {:?} has no values",
                    r
                )));
            }
            if let Refinement::Facet { dimension, .. } = r {
                if bound.contains(&dimension.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "facet on '{}' would overwrite an existing filter",
                        dimension
                    )));
                }
                bound.push(dimension.as_str());
            }
        }
        Ok(())
    }
}

fn two_letter_prefixes(alphabet: &str) -> Vec<String> {
    let letters: Vec<char> = alphabet.chars().collect();
    let mut out = Vec::with_capacity(letters.len() * letters.len());
    for a in &letters {
        for b in &letters {
            out.push(format!("{}{}", a, b));
        }
    }
    out
}

/// Enumerates and subdivides partition keys for one site.
#[derive(Debug, Clone)]
pub struct Partitioner {
    spec: DimensionSpec,
    max_depth: u8,
}

impl Partitioner {
    pub fn new(spec: DimensionSpec) -> Self {
        let max_depth = spec.max_depth.min(HARD_MAX_DEPTH);
        if spec.max_depth > HARD_MAX_DEPTH {
            tracing::warn!(
                requested = spec.max_depth,
                limit = HARD_MAX_DEPTH,
                "max_depth clamped to hard limit"
            );
        }
        Self { spec, max_depth }
    }

    pub fn max_depth(&self) -> u8 {
        self.max_depth
    }

    /// Coarsest partitions, in configured order.
    pub fn seed(&self) -> Vec<PartitionKey> {
        self.spec
            .seed_values()
            .iter()
            .map(|v| PartitionKey::seed(&self.spec.seed_dimension, v))
            .collect()
    }

    fn refinement_for(&self, depth: u8) -> Option<&Refinement> {
        let d = depth as usize;
        match self.spec.refinements.get(d) {
            Some(r) => Some(r),
            None => match self.spec.refinements.last() {
                Some(r @ Refinement::Extend { .. }) => Some(r),
                _ => None,
            },
        }
    }

    pub fn can_subdivide(&self, key: &PartitionKey) -> bool {
        key.depth < self.max_depth && self.refinement_for(key.depth).is_some()
    }

    /// Children one level finer. Empty when the key is at max depth or no
    /// refinement applies; the caller then marks the partition `capped`.
    pub fn subdivide(&self, key: &PartitionKey) -> Vec<PartitionKey> {
        if !self.can_subdivide(key) {
            return Vec::new();
        }
        match self.refinement_for(key.depth) {
            Some(Refinement::Facet { dimension, values }) => values
                .iter()
                .map(|v| key.with_filter(dimension, v.clone()))
                .collect(),
            Some(Refinement::Extend {
                dimension,
                alphabet,
            }) => {
                let base = key.get(dimension).unwrap_or("").to_string();
                alphabet
                    .chars()
                    .map(|c| key.with_filter(dimension, format!("{}{}", base, c)))
                    .collect()
            }
            None => Vec::new(),
        }
    }
}
