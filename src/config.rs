use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::goes::GOES_WEST;

pub(crate) const DEFAULT_CONFIG: &str = "mastobot.toml";
const DEFAULT_DB: &str = "mastobot.db";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 3600);

/// Everything in the config file is optional; command line flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    pub instance: Option<String>,
    pub db: Option<PathBuf>,
    /// humantime syntax, e.g. `10s`
    pub timeout: Option<String>,
    #[serde(default)]
    pub expire: ExpireConfig,
    #[serde(default)]
    pub nodemetrics: NodeMetricsConfig,
    #[serde(default)]
    pub goes: GoesConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ExpireConfig {
    pub max_age: Option<String>,
    pub deletes_per_minute: Option<NonZeroU32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct NodeMetricsConfig {
    pub metrics_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct GoesConfig {
    pub image_url: Option<String>,
}

/// Reads `filename`. A missing default config file is not an error, but one
/// that was asked for explicitly must exist.
pub(crate) fn load_config(filename: Option<&Path>) -> Result<Config> {
    let (path, explicit) = match filename {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG), false),
    };
    if !explicit && !path.exists() {
        return Ok(Config::default());
    }
    let config: Config = toml::from_str(
        &std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?,
    )
    .with_context(|| format!("invalid config file {}", path.display()))?;
    Ok(config)
}

fn duration(value: &str, what: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("invalid {what} {value:?}"))
}

/// Values from the command line, all optional.
#[derive(Debug, Default)]
pub(crate) struct Overrides {
    pub instance: Option<String>,
    pub db: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub max_age: Option<Duration>,
    pub deletes_per_minute: Option<NonZeroU32>,
    pub metrics_url: Option<String>,
    pub image_url: Option<String>,
}

/// The merged configuration the commands run with.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Settings {
    pub instance: Option<String>,
    pub db: PathBuf,
    pub timeout: Duration,
    pub max_age: Duration,
    pub deletes_per_minute: Option<NonZeroU32>,
    pub metrics_url: Option<String>,
    pub image_url: String,
}

impl Settings {
    pub fn merge(config: Config, cli: Overrides) -> Result<Self> {
        let timeout = match (cli.timeout, config.timeout) {
            (Some(t), _) => t,
            (None, Some(t)) => duration(&t, "timeout")?,
            (None, None) => DEFAULT_TIMEOUT,
        };
        let max_age = match (cli.max_age, config.expire.max_age) {
            (Some(age), _) => age,
            (None, Some(age)) => duration(&age, "expire.max_age")?,
            (None, None) => DEFAULT_MAX_AGE,
        };
        Ok(Self {
            instance: cli.instance.or(config.instance),
            db: cli
                .db
                .or(config.db)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB)),
            timeout,
            max_age,
            deletes_per_minute: cli
                .deletes_per_minute
                .or(config.expire.deletes_per_minute),
            metrics_url: cli.metrics_url.or(config.nodemetrics.metrics_url),
            image_url: cli
                .image_url
                .or(config.goes.image_url)
                .unwrap_or_else(|| GOES_WEST.to_string()),
        })
    }

    pub fn instance(&self) -> Result<&str> {
        self.instance
            .as_deref()
            .context("no instance given: pass --instance or set it in the config file")
    }
}
