use std::time::{Duration, Instant};

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::AdapterError;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 2000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Shared GET client for adapters. Retries rate-limit and server errors with
/// exponential backoff; everything else is reported on the first attempt.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_backoff: Duration,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
        })
    }

    pub async fn get_text(&self, url: &str, query: &[(String, String)]) -> Result<String, AdapterError> {
        for attempt in 0..=MAX_RETRIES {
            let start = Instant::now();
            let result = self.client.get(url).query(query).send().await;
            let latency_ms = start.elapsed().as_millis() as u64;

            let retry_reason = match result {
                Ok(resp) => {
                    let status = resp.status();
                    debug!(url, %status, latency_ms, "GET");
                    if status.is_success() {
                        return Ok(resp.text().await?);
                    }
                    if !should_retry(status) {
                        return Err(classify_status(status, url));
                    }
                    format!("HTTP {}", status)
                }
                Err(e) if e.is_timeout() || e.is_connect() => e.to_string(),
                Err(e) => return Err(e.into()),
            };

            if attempt == MAX_RETRIES {
                return Err(AdapterError::Transient(format!(
                    "{} after {} retries: {}",
                    url, MAX_RETRIES, retry_reason
                )));
            }

            let backoff = backoff_for(self.base_backoff, attempt);
            warn!(
                "{} on {} (attempt {}/{}), backing off {:.1}s",
                retry_reason,
                url,
                attempt + 1,
                MAX_RETRIES,
                backoff.as_secs_f64()
            );
            tokio::time::sleep(backoff).await;
        }
        unreachable!("retry loop always returns")
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn classify_status(status: StatusCode, url: &str) -> AdapterError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => AdapterError::NotFound(url.to_string()),
        // 403 is how most bar sites signal bot detection
        _ => AdapterError::Transient(format!("HTTP {} for {}", status, url)),
    }
}

fn backoff_for(base: Duration, attempt: u32) -> Duration {
    base * 2u32.pow(attempt)
}
