use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapter::http::HttpFetcher;
use crate::adapter::profile_page::{ProfilePageAdapter, ProfilePageConfig};
use crate::adapter::vcard_api::{VcardApiAdapter, VcardApiConfig};
use crate::adapter::SiteAdapter;
use crate::error::ConfigError;
use crate::partition::{DimensionSpec, HARD_MAX_DEPTH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterConfig {
    VcardApi(VcardApiConfig),
    ProfilePage(ProfilePageConfig),
}

/// Everything site-specific: how to query it, where it caps, how to split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub site: String,
    pub adapter: AdapterConfig,
    /// Server-side result cap. A partition reporting this many results is
    /// assumed truncated.
    pub cap: u32,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Random extra delay per request, as a percentage of `min_delay_ms`.
    #[serde(default)]
    pub jitter_pct: u8,
    /// Two-letter state used when a record carries none.
    pub default_state: String,
    /// Partition dimension whose value is recorded as a practice area.
    #[serde(default)]
    pub practice_area_dimension: Option<String>,
    pub dimensions: DimensionSpec,
}

fn default_min_delay_ms() -> u64 {
    500
}

impl SiteConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: SiteConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.site.trim().is_empty() {
            return Err(ConfigError::Invalid("site id is empty".into()));
        }
        if self.cap == 0 {
            return Err(ConfigError::Invalid(format!("{}: cap must be positive", self.site)));
        }
        if self.default_state.len() != 2 {
            return Err(ConfigError::Invalid(format!(
                "{}: default_state must be a two-letter code",
                self.site
            )));
        }
        if self.jitter_pct > 100 {
            return Err(ConfigError::Invalid(format!(
                "{}: jitter_pct must be at most 100",
                self.site
            )));
        }
        if self.dimensions.max_depth > HARD_MAX_DEPTH {
            tracing::warn!(
                site = %self.site,
                requested = self.dimensions.max_depth,
                "max_depth above hard limit {}, will be clamped",
                HARD_MAX_DEPTH
            );
        }
        self.dimensions.validate()
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn build_adapter(&self) -> Result<Box<dyn SiteAdapter>, ConfigError> {
        let http = HttpFetcher::new().map_err(|e| ConfigError::Adapter(e.to_string()))?;
        Ok(match &self.adapter {
            AdapterConfig::VcardApi(c) => Box::new(VcardApiAdapter::new(&self.site, c.clone(), http)),
            AdapterConfig::ProfilePage(c) => {
                Box::new(ProfilePageAdapter::new(&self.site, c.clone(), http)?)
            }
        })
    }
}
