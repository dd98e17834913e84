use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context as _;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::image_format::looks_like_html;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/svg+xml,image/*,*/*;q=0.8";
const PAGE_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Backoff discipline shared by every outbound request of one kind.
///
/// The delay starts at `initial_backoff` and doubles after each failure up to
/// `max_backoff`. Once at the ceiling, `max_retries_at_ceiling` further
/// attempts are allowed before the fetch gives up. A success divides the
/// carried delay by `success_decay` (never below `initial_backoff`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_retries_at_ceiling: u32,
    pub success_decay: u32,
    pub retry_html_body: bool,
}

impl RetryPolicy {
    /// Fixed delay between a bounded number of attempts.
    pub fn bounded(delay: Duration, attempts: u32) -> Self {
        Self {
            initial_backoff: delay,
            max_backoff: delay,
            max_retries_at_ceiling: attempts.saturating_sub(1),
            success_decay: 2,
            retry_html_body: false,
        }
    }

    pub fn exponential(initial: Duration, ceiling: Duration, retries_at_ceiling: u32) -> Self {
        Self {
            initial_backoff: initial,
            max_backoff: ceiling.max(initial),
            max_retries_at_ceiling: retries_at_ceiling,
            success_decay: 2,
            retry_html_body: true,
        }
    }

    pub fn images() -> Self {
        Self::bounded(Duration::from_secs(2), 3)
    }

    pub fn pages() -> Self {
        Self::exponential(Duration::from_secs(10), Duration::from_secs(320), 3)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    backoff: Duration,
    retries_at_ceiling: u32,
}

impl RetryState {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self::resume(policy, policy.initial_backoff)
    }

    /// Starts a fetch from a delay carried over from earlier fetches.
    pub fn resume(policy: &RetryPolicy, backoff: Duration) -> Self {
        Self {
            backoff: backoff.clamp(policy.initial_backoff, policy.max_backoff),
            retries_at_ceiling: 0,
        }
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn retries_at_ceiling(&self) -> u32 {
        self.retries_at_ceiling
    }

    /// Records a failed attempt. Returns the delay to wait before the next
    /// attempt, or `None` once the retries at the ceiling are used up.
    pub fn on_failure(&mut self, policy: &RetryPolicy) -> Option<Duration> {
        if self.backoff >= policy.max_backoff {
            if self.retries_at_ceiling >= policy.max_retries_at_ceiling {
                return None;
            }
            self.retries_at_ceiling += 1;
            return Some(self.backoff);
        }

        let delay = self.backoff;
        self.backoff = self.backoff.saturating_mul(2).min(policy.max_backoff);
        Some(delay)
    }

    pub fn on_success(&mut self, policy: &RetryPolicy) {
        let decayed = self.backoff / policy.success_decay.max(1);
        self.backoff = decayed.max(policy.initial_backoff);
        self.retries_at_ceiling = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Image,
    Page,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid url {url:?}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request failed")]
    Transport(#[source] reqwest::Error),
    #[error("HTTP {status}")]
    HttpStatus { status: u16 },
    #[error("received HTML instead of an image")]
    HtmlBody,
    #[error("unexpected content type {found:?}")]
    ContentType { found: String },
    #[error("empty response body")]
    EmptyBody,
    #[error("gave up on {url} after {attempts} attempts: {last}")]
    ExhaustedRetries {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn is_retryable(&self, policy: &RetryPolicy) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::EmptyBody => true,
            FetchError::HttpStatus { status } => is_retryable_status(*status),
            FetchError::HtmlBody => policy.retry_html_body,
            FetchError::InvalidUrl { .. }
            | FetchError::ContentType { .. }
            | FetchError::ExhaustedRetries { .. }
            | FetchError::Cancelled => false,
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    (500..600).contains(&status) || status == StatusCode::TOO_MANY_REQUESTS.as_u16()
}

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub user_agent: String,
    pub timeout: Duration,
    pub max_requests_per_host: usize,
    pub image_policy: RetryPolicy,
    pub page_policy: RetryPolicy,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            timeout: Duration::from_secs(60),
            max_requests_per_host: 2,
            image_policy: RetryPolicy::images(),
            page_policy: RetryPolicy::pages(),
        }
    }
}

#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    image_policy: RetryPolicy,
    page_policy: RetryPolicy,
    image_backoff: Mutex<Duration>,
    page_backoff: Mutex<Duration>,
    hosts: HostLimiter,
    cancel: CancellationToken,
}

impl Fetcher {
    pub fn new(options: FetcherOptions, cancel: CancellationToken) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(options.user_agent)
            .timeout(options.timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            image_backoff: Mutex::new(options.image_policy.initial_backoff),
            page_backoff: Mutex::new(options.page_policy.initial_backoff),
            image_policy: options.image_policy,
            page_policy: options.page_policy,
            hosts: HostLimiter::new(options.max_requests_per_host),
            cancel,
        })
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Delay the next fetch of this kind would start from.
    pub fn carried_backoff(&self, kind: FetchKind) -> Duration {
        *self.carried(kind).lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn fetch_image(&self, url: &str, referer: Option<&str>) -> Result<Vec<u8>, FetchError> {
        self.fetch(url, referer, FetchKind::Image).await
    }

    pub async fn fetch_page(&self, url: &str) -> Result<String, FetchError> {
        let body = self.fetch(url, None, FetchKind::Page).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn fetch(
        &self,
        url: &str,
        referer: Option<&str>,
        kind: FetchKind,
    ) -> Result<Vec<u8>, FetchError> {
        let parsed = Url::parse(url).map_err(|source| FetchError::InvalidUrl {
            url: url.to_owned(),
            source,
        })?;
        let policy = *self.policy(kind);
        let mut state = RetryState::resume(&policy, self.carried_backoff(kind));
        let mut attempt = 1_u32;

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.attempt(&parsed, referer, kind) => result,
            };

            let err = match result {
                Ok(body) => {
                    state.on_success(&policy);
                    self.store_backoff(kind, state.backoff());
                    tracing::debug!(%url, attempt, bytes = body.len(), "fetched");
                    return Ok(body);
                }
                Err(err) => err,
            };

            if !err.is_retryable(&policy) {
                tracing::debug!(%url, attempt, error = %err, "fetch failed; not retryable");
                return Err(err);
            }

            let Some(delay) = state.on_failure(&policy) else {
                self.store_backoff(kind, state.backoff());
                tracing::warn!(%url, attempts = attempt, error = %err, "fetch retries exhausted");
                return Err(FetchError::ExhaustedRetries {
                    url: url.to_owned(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            };

            tracing::warn!(
                %url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "fetch failed; backing off"
            );
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FetchError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn attempt(
        &self,
        url: &Url,
        referer: Option<&str>,
        kind: FetchKind,
    ) -> Result<Vec<u8>, FetchError> {
        let _permit = self.hosts.acquire(url).await;

        let accept = match kind {
            FetchKind::Image => IMAGE_ACCEPT,
            FetchKind::Page => PAGE_ACCEPT,
        };
        let mut request = self
            .client
            .get(url.clone())
            .header(ACCEPT, accept)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9");
        if let Some(referer) = referer {
            request = request.header(REFERER, referer);
        }

        let response = request.send().await.map_err(FetchError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = response.bytes().await.map_err(FetchError::Transport)?;

        validate_body(kind, content_type.as_deref(), &body)?;
        Ok(body.to_vec())
    }

    fn policy(&self, kind: FetchKind) -> &RetryPolicy {
        match kind {
            FetchKind::Image => &self.image_policy,
            FetchKind::Page => &self.page_policy,
        }
    }

    fn carried(&self, kind: FetchKind) -> &Mutex<Duration> {
        match kind {
            FetchKind::Image => &self.image_backoff,
            FetchKind::Page => &self.page_backoff,
        }
    }

    fn store_backoff(&self, kind: FetchKind, backoff: Duration) {
        *self.carried(kind).lock().unwrap_or_else(PoisonError::into_inner) = backoff;
    }
}

fn validate_body(kind: FetchKind, content_type: Option<&str>, body: &[u8]) -> Result<(), FetchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::EmptyBody);
    }

    if kind == FetchKind::Page {
        return Ok(());
    }

    if looks_like_html(body) {
        return Err(FetchError::HtmlBody);
    }

    let content_type = content_type.unwrap_or_default().trim().to_ascii_lowercase();
    if !content_type.starts_with("image/") {
        return Err(FetchError::ContentType {
            found: content_type,
        });
    }

    Ok(())
}

/// Caps in-flight requests per host; backoff sleeps do not hold a permit.
#[derive(Debug)]
struct HostLimiter {
    permits: usize,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HostLimiter {
    fn new(permits: usize) -> Self {
        Self {
            permits: permits.max(1),
            hosts: Mutex::new(HashMap::new()),
        }
    }

    async fn acquire(&self, url: &Url) -> Option<OwnedSemaphorePermit> {
        let host = match url.port() {
            Some(port) => format!("{}:{port}", url.host_str().unwrap_or_default()),
            None => url.host_str().unwrap_or_default().to_owned(),
        };
        let semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                hosts
                    .entry(host)
                    .or_insert_with(|| Arc::new(Semaphore::new(self.permits))),
            )
        };
        semaphore.acquire_owned().await.ok()
    }
}
