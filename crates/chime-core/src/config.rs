use chrono::Weekday;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_EVERY_DAY_LABEL: &str = "Every day";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 1;
pub const DEFAULT_FIRED_CHANNEL_CAPACITY: usize = 256;

/// Top-level config (chime.toml + CHIME_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChimeConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// User-facing scheduling preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Day the week starts on in every rendered day list.
    /// Accepts `"mon"`, `"Monday"`, `"sun"`, ...
    #[serde(default = "default_first_day")]
    pub first_day_of_week: Weekday,
    /// Text shown when a weekly trigger fires on all seven days.
    #[serde(default = "default_every_day_label")]
    pub every_day_label: String,
    /// Seven abbreviated names, Monday first. English when unset.
    #[serde(default)]
    pub short_day_names: Option<Vec<String>>,
    /// Seven full names, Monday first. English when unset.
    #[serde(default)]
    pub long_day_names: Option<Vec<String>>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            first_day_of_week: default_first_day(),
            every_day_label: default_every_day_label(),
            short_day_names: None,
            long_day_names: None,
        }
    }
}

/// Where armed alarms are kept between restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Alarm engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the engine looks for due alarms.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Capacity of the fired-alarm channel. Alarms are dropped (and logged)
    /// when the consumer falls this far behind.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            channel_capacity: DEFAULT_FIRED_CHANNEL_CAPACITY,
        }
    }
}

fn default_first_day() -> Weekday {
    Weekday::Mon
}
fn default_every_day_label() -> String {
    DEFAULT_EVERY_DAY_LABEL.to_string()
}
fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}
fn default_channel_capacity() -> usize {
    DEFAULT_FIRED_CHANNEL_CAPACITY
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.db", home)
}

impl ChimeConfig {
    /// Load config from a TOML file with CHIME_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.chime/chime.toml
    ///
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        // Double underscore separates sections so field names keep their own
        // underscores: CHIME_SCHEDULE__FIRST_DAY_OF_WEEK.
        let config: ChimeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHIME_").split("__"))
            .extract()
            .map_err(|e| crate::error::ChimeError::Config(e.to_string()))?;

        tracing::debug!(%path, first_day = ?config.schedule.first_day_of_week, "config loaded");
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.toml", home)
}
