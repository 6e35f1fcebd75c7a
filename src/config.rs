use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

const CONFIG_FILE: &str = "scraper";
const ENV_PREFIX: &str = "SCRAPER";

/// Runtime settings. Every field has a default, so an empty environment works.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub start_year: i32,
    pub end_year: i32,
    /// Pause between judgement fetches.
    pub delay_ms: u64,
    /// Pause between listing page fetches.
    pub listing_delay_ms: u64,
    /// Flush partition + marker after this many items.
    pub flush_every: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
    pub data_dir: PathBuf,
    /// Partition directory, relative to `data_dir`.
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "https://indiankanoon.org".to_string(),
            start_year: 2010,
            end_year: 2026,
            delay_ms: 1500,
            listing_delay_ms: 1000,
            flush_every: 5,
            timeout_secs: 60,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
                .to_string(),
            data_dir: PathBuf::from("."),
            output_dir: PathBuf::from("judgements"),
        }
    }
}

impl Settings {
    /// Load from an optional `scraper.toml` and `SCRAPER_*` environment variables.
    pub fn load() -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_every == 0 {
            bail!("flush_every must be at least 1");
        }
        if self.start_year > self.end_year {
            bail!(
                "start_year ({}) is after end_year ({})",
                self.start_year,
                self.end_year
            );
        }
        Ok(())
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn listing_delay(&self) -> Duration {
        Duration::from_millis(self.listing_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start_year..=self.end_year
    }
}
