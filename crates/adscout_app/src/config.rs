//! RON configuration of the `run` command.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use adscout_engine::{FetchSettings, PageLoadPolicy, SchedulerSettings, Scout, SelectorRules};
use adscout_logging::{LevelFilter, LogDestination};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Holds the page cache, the offer ledger and the run audit.
    pub data_dir: PathBuf,
    pub log: LogConfig,
    pub fetch: FetchConfig,
    pub scheduler: SchedulerConfig,
    pub scouts: Vec<ScoutConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("adscout-data"),
            log: LogConfig::default(),
            fetch: FetchConfig::default(),
            scheduler: SchedulerConfig::default(),
            scouts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogTarget {
    File,
    #[default]
    Terminal,
    Both,
}

impl From<LogTarget> for LogDestination {
    fn from(target: LogTarget) -> Self {
        match target {
            LogTarget::File => LogDestination::File,
            LogTarget::Terminal => LogDestination::Terminal,
            LogTarget::Both => LogDestination::Both,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub destination: LogTarget,
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`.
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            destination: LogTarget::Terminal,
            level: "info".to_string(),
            file: None,
        }
    }
}

impl LogConfig {
    pub fn level_filter(&self) -> anyhow::Result<LevelFilter> {
        self.level
            .parse::<LevelFilter>()
            .ok()
            .with_context(|| format!("unknown log level `{}`", self.level))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub redirect_limit: usize,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let defaults = FetchSettings::default();
        Self {
            connect_timeout_secs: defaults.connect_timeout.as_secs(),
            request_timeout_secs: defaults.request_timeout.as_secs(),
            redirect_limit: defaults.redirect_limit,
            max_bytes: defaults.max_bytes,
            allowed_content_types: defaults.allowed_content_types,
            user_agent: Some(format!("adscout/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

impl FetchConfig {
    pub fn to_settings(&self) -> FetchSettings {
        FetchSettings {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            redirect_limit: self.redirect_limit,
            max_bytes: self.max_bytes,
            allowed_content_types: self.allowed_content_types.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub throttle_secs: u64,
    pub poll_interval_ms: u64,
    pub max_old_urls_in_line: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let defaults = SchedulerSettings::default();
        Self {
            throttle_secs: defaults.throttle.as_secs(),
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            max_old_urls_in_line: defaults.max_old_urls_in_line,
        }
    }
}

impl SchedulerConfig {
    pub fn to_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            throttle: Duration::from_secs(self.throttle_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_old_urls_in_line: self.max_old_urls_in_line,
        }
    }
}

/// One watched listing site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoutConfig {
    pub id: String,
    pub start_url: String,
    pub listing_selector: String,
    pub next_page_selector: String,
    /// Attribute holding the link; `href` when absent.
    #[serde(default)]
    pub link_attribute: Option<String>,
    #[serde(default)]
    pub max_pages: Option<usize>,
    /// Reuse cached listing pages younger than this.
    #[serde(default)]
    pub cache_max_age_secs: Option<u64>,
}

impl ScoutConfig {
    pub fn build(&self) -> anyhow::Result<Scout> {
        let mut rules = SelectorRules::new(&self.listing_selector, &self.next_page_selector)
            .with_context(|| format!("scout `{}`", self.id))?;
        if let Some(attribute) = &self.link_attribute {
            rules = rules.with_attribute(attribute.clone());
        }
        let mut scout = Scout::new(&self.start_url, rules)
            .with_context(|| format!("scout `{}`", self.id))?
            .with_policy(PageLoadPolicy {
                cache_max_age: self.cache_max_age_secs.map(Duration::from_secs),
                store_to_cache: true,
            });
        if let Some(max_pages) = self.max_pages {
            scout = scout.with_max_pages(max_pages);
        }
        Ok(scout)
    }
}

pub fn parse(text: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = ron::from_str(text).context("malformed configuration")?;
    validate(&config)?;
    Ok(config)
}

pub fn load(path: &Path) -> anyhow::Result<AppConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read configuration {}", path.display()))?;
    parse(&text).with_context(|| format!("in {}", path.display()))
}

fn validate(config: &AppConfig) -> anyhow::Result<()> {
    config.log.level_filter()?;
    let mut ids = HashSet::new();
    for scout in &config.scouts {
        if scout.id.trim().is_empty() {
            bail!("scout with start url {} has an empty id", scout.start_url);
        }
        if !ids.insert(scout.id.as_str()) {
            bail!("scout id `{}` is used twice", scout.id);
        }
    }
    Ok(())
}
