use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, PRAGMA, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::models::Config;

pub mod dart_client;
pub mod krx_client;

pub use dart_client::DartClient;
pub use krx_client::KrxClient;

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Build the shared HTTP client
pub fn build_http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .timeout(config.http_timeout)
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .map_err(|e| SyncError::upstream("http_client", e))
}

/// Header set the DART bulk endpoint expects from a real browser
pub fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("application/xml, text/xml, */*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ko-KR,ko;q=0.9,en;q=0.8"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert("sec-fetch-dest", HeaderValue::from_static("document"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("navigate"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("none"));
    headers.insert("sec-fetch-user", HeaderValue::from_static("?1"));
    headers
}

/// Exponential backoff schedule: no wait before attempt 1, then
/// `base * 2^(attempt - 2)` before every later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.retry_max_attempts.max(1),
            base_delay: config.retry_base_delay,
        }
    }

    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt < 2 {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        Some(self.base_delay.saturating_mul(factor))
    }
}

/// Request-with-backoff primitive shared by the unstable upstreams
#[derive(Clone)]
pub struct RetryingFetcher {
    client: Client,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(client: Client, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Send the request built by `build` until a success status comes back.
    ///
    /// Transport errors and non-2xx statuses both count as failed attempts.
    /// After `max_attempts` failures the call fails with `UpstreamExhausted`.
    pub async fn fetch<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if let Some(delay) = self.policy.delay_before(attempt) {
                info!("⏳ Retrying in {:?}... (attempt {}/{})", delay, attempt, max_attempts);
                tokio::time::sleep(delay).await;
            }

            debug!("Attempt {}: sending request", attempt);
            match build(&self.client).send().await {
                Ok(response) if response.status().is_success() => {
                    info!("✅ Request succeeded on attempt {}", attempt);
                    return Ok(response);
                }
                Ok(response) => {
                    warn!("Upstream responded with status {} on attempt {}", response.status(), attempt);
                    last_error = format!("status {}", response.status());
                }
                Err(e) => {
                    warn!("Attempt {} failed: {}", attempt, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(SyncError::UpstreamExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
