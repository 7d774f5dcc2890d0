use thiserror::Error;

/// Failures reported by a site adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network failure, timeout, or a rate-limit/server error that survived retries.
    #[error("transient fetch failure: {0}")]
    Transient(String),
    /// The site answered but the payload did not have the expected shape.
    #[error("parse failure: {0}")]
    Parse(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl AdapterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Transient(_))
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        AdapterError::Transient(e.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(e: serde_json::Error) -> Self {
        AdapterError::Parse(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt partition row for {site}/{key}: {reason}")]
    Corrupt {
        site: String,
        key: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read site config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid site config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid site config: {0}")]
    Invalid(String),
    #[error("adapter setup failed: {0}")]
    Adapter(String),
}
