use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::fetch::{DEFAULT_USER_AGENT, FetcherOptions, RetryPolicy};
use crate::normalize::DEFAULT_JPEG_QUALITY;
use crate::pipeline::PipelineOptions;
use crate::reconcile::ChapterRange;
use crate::sites::{SiteConfig, TitleRef};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub destination: PathBuf,
    pub scratch_dir: Option<PathBuf>,
    pub jpeg_quality: u8,
    pub chapter_concurrency: usize,
    pub max_requests_per_host: usize,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub retry: RetryConfig,
    pub sites: Vec<SiteConfig>,
    pub titles: Vec<TitleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: PathBuf::from("."),
            scratch_dir: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            chapter_concurrency: 1,
            max_requests_per_host: 2,
            request_timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: RetryConfig::default(),
            sites: Vec::new(),
            titles: Vec::new(),
        }
    }
}

impl Config {
    /// Loads `path`, or the defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(text)?;
        Ok(config)
    }

    pub fn fetcher_options(&self) -> FetcherOptions {
        FetcherOptions {
            user_agent: self.user_agent.clone(),
            timeout: Duration::from_secs(self.request_timeout_secs.max(1)),
            max_requests_per_host: self.max_requests_per_host.max(1),
            image_policy: self.retry.image.apply(RetryPolicy::images()),
            page_policy: self.retry.page.apply(RetryPolicy::pages()),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            jpeg_quality: self.jpeg_quality.clamp(1, 100),
            chapter_concurrency: self.chapter_concurrency.max(1),
            scratch_root: self.scratch_dir.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub image: RetryPolicyConfig,
    pub page: RetryPolicyConfig,
}

/// Overrides for one retry policy; unset fields keep the built-in value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicyConfig {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_retries_at_ceiling: Option<u32>,
    pub success_decay: Option<u32>,
    pub retry_html_body: Option<bool>,
}

impl RetryPolicyConfig {
    pub fn apply(&self, base: RetryPolicy) -> RetryPolicy {
        let initial_backoff = self
            .initial_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(base.initial_backoff);
        let max_backoff = self
            .max_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(base.max_backoff)
            .max(initial_backoff);

        RetryPolicy {
            initial_backoff,
            max_backoff,
            max_retries_at_ceiling: self
                .max_retries_at_ceiling
                .unwrap_or(base.max_retries_at_ceiling),
            success_decay: self.success_decay.unwrap_or(base.success_decay).max(1),
            retry_html_body: self.retry_html_body.unwrap_or(base.retry_html_body),
        }
    }
}

/// One queued title for `batch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TitleConfig {
    pub site: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub shortname: Option<String>,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub end: Option<u64>,
    #[serde(default)]
    pub destination: Option<PathBuf>,
}

impl TitleConfig {
    pub fn title_ref(&self) -> anyhow::Result<TitleRef> {
        match (&self.url, &self.shortname) {
            (Some(url), None) => Ok(TitleRef::Url(url.clone())),
            (None, Some(shortname)) => Ok(TitleRef::Shortname(shortname.clone())),
            _ => anyhow::bail!(
                "title for site {} needs exactly one of url or shortname",
                self.site
            ),
        }
    }

    pub fn range(&self) -> ChapterRange {
        ChapterRange {
            start: self.start,
            end: self.end,
        }
    }
}
