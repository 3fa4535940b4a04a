//! Rate-limited JSON fetching for reelscout's external collaborators.
//!
//! Every collaborator (discussion platform, completion service, catalog) gets its own
//! [`RateLimitedFetcher`] carrying its own [`RateBudget`] and [`BackoffPolicy`]. Failures never
//! propagate out of [`RateLimitedFetcher::fetch`] or [`RateLimitedFetcher::post_json`]: they are
//! logged and surface as `None`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};

pub use reqwest::header;
pub use reqwest::Url;

pub const CRATE_NAME: &str = "reelscout-fetch";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Only throttling is retried; every other non-success status is final.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffCurve {
    /// `base * attempt_number`
    Linear,
    /// `base * 2^attempt_index`
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub curve: BackoffCurve,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            curve: BackoffCurve::Linear,
        }
    }
}

impl BackoffPolicy {
    pub fn linear(base_delay: Duration) -> Self {
        Self {
            base_delay,
            curve: BackoffCurve::Linear,
            ..Default::default()
        }
    }

    pub fn exponential(base_delay: Duration) -> Self {
        Self {
            base_delay,
            curve: BackoffCurve::Exponential,
            ..Default::default()
        }
    }

    /// Delay to wait after the failed attempt at `attempt_index` (zero-based).
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = match self.curve {
            BackoffCurve::Linear => u32::try_from(attempt_index + 1).unwrap_or(u32::MAX),
            BackoffCurve::Exponential => 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX),
        };
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Request budget of one collaborator, expressed as a token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateBudget {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl RateBudget {
    /// At most one request per `interval`, no burst.
    pub fn spaced(interval: Duration) -> Self {
        Self {
            capacity: 1,
            refill_every: interval,
        }
    }

    /// Evenly spread `requests` per minute, no burst.
    pub fn per_minute(requests: u32) -> Self {
        let requests = requests.max(1);
        Self::spaced(Duration::from_millis(60_000 / u64::from(requests)))
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(budget: RateBudget) -> Self {
        Self {
            capacity: budget.capacity.max(1),
            refill_every: budget.refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: budget.capacity.max(1),
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every.saturating_sub(elapsed);
            drop(state);
            tokio::time::sleep(sleep_for.max(Duration::from_millis(1))).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Collaborator name used in log fields.
    pub name: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
    pub budget: Option<RateBudget>,
}

impl FetcherConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
            budget: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("building http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("still throttled after {attempts} attempts for {url}")]
    Throttled { attempts: usize, url: String },
    #[error("response from {url} is not json: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug)]
pub struct RateLimitedFetcher {
    name: String,
    client: reqwest::Client,
    bucket: Option<TokenBucket>,
    backoff: BackoffPolicy,
    retries: AtomicUsize,
    failures: AtomicUsize,
}

impl RateLimitedFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().map_err(FetchError::Build)?;

        Ok(Self {
            name: config.name,
            client,
            bucket: config.budget.map(TokenBucket::new),
            backoff: config.backoff,
            retries: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of backoff waits taken so far.
    pub fn retries_observed(&self) -> usize {
        self.retries.load(Ordering::Relaxed)
    }

    /// Number of calls that degraded to an empty result.
    pub fn failures_observed(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    /// GET `url` and decode JSON; `None` on any failure.
    pub async fn fetch(&self, url: &str, headers: &HeaderMap) -> Option<JsonValue> {
        self.degrade(url, self.send_json(Method::GET, url, headers, None).await)
    }

    /// GET like [`fetch`](Self::fetch) but hands the failure back, so callers can tell an
    /// unreachable collaborator from an empty answer.
    pub async fn try_fetch(&self, url: &str, headers: &HeaderMap) -> Result<JsonValue, FetchError> {
        let result = self.send_json(Method::GET, url, headers, None).await;
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// POST a JSON body and decode the JSON response; `None` on any failure.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &HeaderMap,
        body: &JsonValue,
    ) -> Option<JsonValue> {
        self.degrade(url, self.send_json(Method::POST, url, headers, Some(body)).await)
    }

    fn degrade(&self, url: &str, result: Result<JsonValue, FetchError>) -> Option<JsonValue> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(collaborator = %self.name, url, error = %err, "fetch degraded to empty result");
                None
            }
        }
    }

    /// Retry loop behind [`fetch`](Self::fetch) and [`post_json`](Self::post_json).
    pub async fn send_json(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_fetch", collaborator = %self.name, %method, url);
        self.send_json_inner(method, url, headers, body)
            .instrument(span)
            .await
    }

    async fn send_json_inner(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        body: Option<&JsonValue>,
    ) -> Result<JsonValue, FetchError> {
        let max_attempts = self.backoff.max_attempts.max(1);

        for attempt in 0..max_attempts {
            if let Some(bucket) = &self.bucket {
                bucket.take().await;
            }

            let mut request = self.client.request(method.clone(), url).headers(headers.clone());
            if let Some(body) = body {
                request = request.json(body);
            }

            let is_last = attempt + 1 == max_attempts;
            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let bytes = resp.bytes().await?;
                        return serde_json::from_slice(&bytes).map_err(|source| FetchError::Decode {
                            url: url.to_string(),
                            source,
                        });
                    }

                    if classify_status(status) == RetryDisposition::NonRetryable {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }

                    if is_last {
                        return Err(FetchError::Throttled {
                            attempts: max_attempts,
                            url: url.to_string(),
                        });
                    }

                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "throttled; backing off");
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable || is_last {
                        return Err(FetchError::Request(err));
                    }
                    let delay = self.backoff.delay_for_attempt(attempt);
                    warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "transport error; backing off");
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        debug!("retry loop exhausted without a response");
        Err(FetchError::Throttled {
            attempts: max_attempts,
            url: url.to_string(),
        })
    }
}
