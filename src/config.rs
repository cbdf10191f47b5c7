use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use log::LevelFilter;
use serde::Deserialize;

use crate::checkout::PollConfig;

/// CLI settings. Read from an optional `topup.toml` (or the file named by
/// `--config`), then overridden by `TOPUP_*` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub session_path: String,
    pub poll_interval_ms: u64,
    pub poll_max_attempts: u32,
    pub poll_max_secs: u64,
    pub log_level: String,
}
impl Settings {
    pub fn load(file: Option<&str>) -> Result<Self> {
        let builder = Config::builder()
            .set_default("api_url", "http://127.0.0.1:8081")?
            .set_default("session_path", ".topup-session.json")?
            .set_default("poll_interval_ms", 3000_i64)?
            .set_default("poll_max_attempts", 200_i64)?
            .set_default("poll_max_secs", 600_i64)?
            .set_default("log_level", "warn")?;
        let builder = match file {
            Some(path) => builder.add_source(File::with_name(path)),
            None => builder.add_source(File::with_name("topup").required(false)),
        };
        builder
            .add_source(Environment::with_prefix("TOPUP"))
            .build()
            .context("Couldn't read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            max_attempts: self.poll_max_attempts,
            max_duration: Duration::from_secs(self.poll_max_secs),
        }
    }
    pub fn level_filter(&self) -> LevelFilter {
        self.log_level.parse().unwrap_or(LevelFilter::Warn)
    }
}
