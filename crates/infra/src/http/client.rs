use std::future::Future;
use std::time::Duration;

use billsync_common::{ExponentialBackoff, RequestThrottle, ThrottleConfig};
use billsync_domain::{BillSyncError, RemoteConfig};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::errors::InfraError;

/// Rate-limited HTTP executor for one remote API.
///
/// Every call waits on the shared [`RequestThrottle`], retries transient
/// failures (timeouts, connection errors, 5xx, unreadable bodies) with
/// exponential backoff up to
/// `max_attempts` total attempts, and sits out throttling responses (429, or
/// a 403 that looks like rate limiting) in a separate cooldown loop that
/// does not consume the transient budget.
#[derive(Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    base_url: Url,
    max_attempts: u32,
    backoff: ExponentialBackoff,
    throttle: RequestThrottle,
    rate_limit_cooldown: Duration,
    forbidden_cooldown: Duration,
    max_throttle_retries: u32,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Builder preloaded with the executor settings from configuration.
    ///
    /// # Errors
    /// Returns `BillSyncError::Config` when the base URL does not parse.
    pub fn from_config(remote: &RemoteConfig) -> Result<HttpClientBuilder, BillSyncError> {
        let throttle = ThrottleConfig {
            min_interval: Duration::from_millis(remote.min_interval_ms),
            burst_size: remote.burst_size,
            burst_cooldown: Duration::from_millis(remote.burst_cooldown_ms),
        };
        throttle.validate().map_err(BillSyncError::Config)?;

        Ok(Self::builder()
            .base_url(&remote.base_url)?
            .timeout(remote.timeout())
            .max_attempts(remote.max_attempts)
            .backoff(ExponentialBackoff::new(
                Duration::from_millis(remote.backoff_base_ms),
                Duration::from_millis(remote.backoff_max_ms),
            ))
            .throttle(throttle)
            .rate_limit_cooldown(Duration::from_secs(remote.rate_limit_cooldown_secs))
            .forbidden_cooldown(Duration::from_secs(remote.forbidden_cooldown_secs))
            .max_throttle_retries(remote.max_throttle_retries)
            .user_agent(remote.user_agent.clone()))
    }

    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `endpoint` against the base URL.
    ///
    /// # Errors
    /// Returns `BillSyncError::InvalidInput` for endpoints that do not form a
    /// valid URL.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, BillSyncError> {
        self.base_url
            .join(endpoint.trim_start_matches('/'))
            .map_err(|e| BillSyncError::InvalidInput(format!("invalid endpoint '{endpoint}': {e}")))
    }

    /// Execute one logical request, with throttling, cooldowns and retries.
    ///
    /// # Errors
    /// - `Auth` for 401 and non-throttle 403
    /// - `NotFound` for 404, `Remote` for other 4xx
    /// - `RateLimited` once more than `max_throttle_retries` throttle
    ///   responses were received
    /// - `Network` when transient failures exhausted `max_attempts`
    pub async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Response, BillSyncError> {
        self.execute_with(method, endpoint, params, |response| async move {
            Ok::<_, String>(response)
        })
        .await
    }

    /// Execute a request and decode its JSON body.
    ///
    /// A body that cannot be read or decoded counts as a transient failure
    /// and is retried within the same `max_attempts` budget.
    ///
    /// # Errors
    /// Same as [`Self::execute`].
    pub async fn execute_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, BillSyncError> {
        self.execute_with(method, endpoint, params, |response| async move {
            match response.text().await {
                Ok(body) => {
                    serde_json::from_str(&body).map_err(|e| format!("malformed response body: {e}"))
                }
                Err(e) => Err(format!("failed to read response body: {e}")),
            }
        })
        .await
    }

    async fn execute_with<T, F, Fut>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        mut read: F,
    ) -> Result<T, BillSyncError>
    where
        F: FnMut(Response) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let url = self.endpoint_url(endpoint)?;
        let mut attempt: u32 = 0;
        let mut transient_failures: u32 = 0;
        let mut throttle_hits: u32 = 0;

        loop {
            attempt += 1;
            self.throttle.acquire().await;
            debug!(attempt, %method, endpoint, "sending HTTP request");

            let result = self.client.request(method.clone(), url.clone()).query(params).send().await;

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    debug!(attempt, %method, endpoint, error = %err, "HTTP request failed");
                    if !should_retry_error(&err) {
                        return Err(InfraError::from(err).into());
                    }
                    transient_failures += 1;
                    if transient_failures >= self.max_attempts {
                        warn!(endpoint, attempts = transient_failures, error = %err, "giving up after transient failures");
                        return Err(InfraError::from(err).into());
                    }
                    self.backoff.wait(transient_failures).await;
                    continue;
                }
            };

            let status = response.status();
            debug!(attempt, %method, endpoint, %status, "received HTTP response");

            if status.is_success() {
                match read(response).await {
                    Ok(value) => return Ok(value),
                    Err(reason) => {
                        transient_failures += 1;
                        if transient_failures >= self.max_attempts {
                            warn!(endpoint, attempts = transient_failures, reason = %reason, "giving up on unreadable responses");
                            return Err(BillSyncError::Network(format!(
                                "{reason} from {endpoint} after {transient_failures} attempts"
                            )));
                        }
                        debug!(attempt, endpoint, reason = %reason, "unreadable response, retrying");
                        self.backoff.wait(transient_failures).await;
                        continue;
                    }
                }
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let cooldown = retry_after(response.headers()).unwrap_or(self.rate_limit_cooldown);
                throttle_hits += 1;
                self.throttle_cooldown(endpoint, status, throttle_hits, cooldown).await?;
                continue;
            }

            if status == StatusCode::FORBIDDEN {
                let hinted = retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                if hinted.is_some() || looks_throttled(&body) {
                    throttle_hits += 1;
                    let cooldown = hinted.unwrap_or(self.forbidden_cooldown);
                    self.throttle_cooldown(endpoint, status, throttle_hits, cooldown).await?;
                    continue;
                }
                return Err(BillSyncError::Auth(format!(
                    "HTTP 403 Forbidden from {endpoint}: {}",
                    snippet(&body)
                )));
            }

            if status.is_server_error() {
                transient_failures += 1;
                if transient_failures >= self.max_attempts {
                    warn!(endpoint, attempts = transient_failures, %status, "giving up after server errors");
                    return Err(BillSyncError::Network(format!(
                        "HTTP {} from {endpoint} after {transient_failures} attempts",
                        status.as_u16()
                    )));
                }
                self.backoff.wait(transient_failures).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let message = format!("HTTP {} from {endpoint}: {}", status.as_u16(), snippet(&body));
            return Err(match status {
                StatusCode::UNAUTHORIZED => BillSyncError::Auth(message),
                StatusCode::NOT_FOUND => BillSyncError::NotFound(message),
                _ => BillSyncError::Remote(message),
            });
        }
    }

    async fn throttle_cooldown(
        &self,
        endpoint: &str,
        status: StatusCode,
        hits: u32,
        cooldown: Duration,
    ) -> Result<(), BillSyncError> {
        if hits > self.max_throttle_retries {
            warn!(endpoint, %status, hits, "rate limit persisted past retry bound");
            return Err(BillSyncError::RateLimited(format!(
                "{endpoint} still throttled after {} cooldowns",
                self.max_throttle_retries
            )));
        }
        warn!(endpoint, %status, hits, cooldown_ms = cooldown.as_millis(), "throttled by remote, cooling down");
        tokio::time::sleep(cooldown).await;
        Ok(())
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    base_url: Option<Url>,
    timeout: Duration,
    max_attempts: u32,
    backoff: ExponentialBackoff,
    throttle: ThrottleConfig,
    rate_limit_cooldown: Duration,
    forbidden_cooldown: Duration,
    max_throttle_retries: u32,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            backoff: ExponentialBackoff::default(),
            throttle: ThrottleConfig::default(),
            rate_limit_cooldown: Duration::from_secs(10),
            forbidden_cooldown: Duration::from_secs(60),
            max_throttle_retries: 5,
            user_agent: None,
            default_headers: None,
        }
    }
}

impl HttpClientBuilder {
    /// Base URL every endpoint is resolved against. A trailing slash is
    /// added so relative endpoints extend the path instead of replacing it.
    ///
    /// # Errors
    /// Returns `BillSyncError::Config` when the URL does not parse.
    pub fn base_url(mut self, base: &str) -> Result<Self, BillSyncError> {
        let normalized =
            if base.ends_with('/') { base.to_string() } else { format!("{base}/") };
        let url = Url::parse(&normalized)
            .map_err(|e| BillSyncError::Config(format!("invalid base URL '{base}': {e}")))?;
        self.base_url = Some(url);
        Ok(self)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Configure the total number of attempts (initial try + retries).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn throttle(mut self, throttle: ThrottleConfig) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    pub fn forbidden_cooldown(mut self, cooldown: Duration) -> Self {
        self.forbidden_cooldown = cooldown;
        self
    }

    pub fn max_throttle_retries(mut self, retries: u32) -> Self {
        self.max_throttle_retries = retries;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// # Errors
    /// `Config` when no base URL was set, or the reqwest client fails to
    /// build.
    pub fn build(self) -> Result<HttpClient, BillSyncError> {
        let base_url = self
            .base_url
            .ok_or_else(|| BillSyncError::Config("http client requires a base URL".into()))?;

        let mut builder = ReqwestClient::builder().timeout(self.timeout).no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(|err| {
            let infra: InfraError = err.into();
            BillSyncError::from(infra)
        })?;

        Ok(HttpClient {
            client,
            base_url,
            max_attempts: self.max_attempts.max(1),
            backoff: self.backoff,
            throttle: RequestThrottle::new(self.throttle),
            rate_limit_cooldown: self.rate_limit_cooldown,
            forbidden_cooldown: self.forbidden_cooldown,
            max_throttle_retries: self.max_throttle_retries,
        })
    }
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_request() || err.is_connect()
}

/// `Retry-After` in whole seconds; HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Whether a 403 body reads like rate limiting rather than a permission
/// problem.
fn looks_throttled(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    ["rate limit", "too many", "limite de requisi", "quota"].iter().any(|hint| lower.contains(hint))
}

fn snippet(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(200) {
        Some((idx, _)) => format!("{}…", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
