// src/config/mod.rs
//! Service configuration: `config/aggregator.toml` (or
//! `$AGGREGATOR_CONFIG_PATH`), every field defaulted, then env overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::alert::{OperatorAlert, TracingAlert, WebhookAlert};
use crate::ingest::scheduler::SchedulerConfig;

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub scheduler: SchedulerConfig,
    pub run: RunConfig,
    pub http: HttpConfig,
    pub alert: AlertConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Global wall-clock budget for one run.
    pub deadline_secs: u64,
    /// Scheduled trigger period; 0 disables the trigger.
    pub interval_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline_secs: 300,
            interval_secs: 3600,
        }
    }
}

impl RunConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs.max(1))
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("content-aggregator/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl HttpConfig {
    /// Shared client for every provider adapter.
    pub fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(Duration::from_secs(self.request_timeout_secs.max(1)))
            .build()
            .context("building http client")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Discord-compatible webhook; `env:NAME` reads it from the environment.
    pub webhook_url: Option<String>,
    /// Per-attempt timeout for one webhook post.
    pub timeout_secs: u64,
    /// Total delivery attempts.
    pub max_retries: u8,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 5,
            max_retries: 3,
        }
    }
}

impl AlertConfig {
    /// Webhook sink when a URL resolves, tracing otherwise.
    pub fn build(&self) -> Arc<dyn OperatorAlert> {
        match self.resolved_webhook() {
            Some(url) => Arc::new(
                WebhookAlert::new(url)
                    .with_timeout(self.timeout_secs)
                    .with_retries(self.max_retries),
            ),
            None => Arc::new(TracingAlert),
        }
    }

    pub fn resolved_webhook(&self) -> Option<String> {
        let raw = self.webhook_url.as_deref()?.trim();
        match raw.strip_prefix("env:") {
            Some(name) => env::var(name).ok().filter(|v| !v.trim().is_empty()),
            None => (!raw.is_empty()).then(|| raw.to_string()),
        }
    }
}

impl AggregatorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing aggregator config")
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    /// Resolve, load and apply env overrides:
    /// 1) $AGGREGATOR_CONFIG_PATH (must exist)
    /// 2) config/aggregator.toml (defaults when absent)
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(ENV_CONFIG_PATH) {
            Ok(p) => {
                let pb = PathBuf::from(p);
                if !pb.exists() {
                    return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
                }
                Self::load_from_file(&pb)?
            }
            Err(_) => {
                let pb = PathBuf::from(DEFAULT_CONFIG_PATH);
                if pb.exists() {
                    Self::load_from_file(&pb)?
                } else {
                    Self::default()
                }
            }
        };
        cfg.apply_env_overrides()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<u64>("CRAWL_INTERVAL_SECS")? {
            self.run.interval_secs = v;
        }
        if let Some(v) = env_parse::<usize>("CRAWL_CONCURRENCY")? {
            self.scheduler.concurrency = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("CRAWL_SOURCE_TIMEOUT_MS")? {
            self.scheduler.source_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u32>("CRAWL_MAX_RETRIES")? {
            self.scheduler.max_retries = v;
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("invalid {key}={v}")),
        _ => Ok(None),
    }
}
