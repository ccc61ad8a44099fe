pub mod database;

use ::config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::models::gps::FixPolicy;
use crate::services::detection::DetectionConfig;

pub const CONFIG_PATH_VAR: &str = "GEOFENCE_CONFIG";
pub const ENV_PREFIX: &str = "GEOFENCE";

/// Upper bound for the second-granularity durations: one year.
pub const MAX_DURATION_SECS: i64 = 365 * 24 * 60 * 60;

/// Runtime settings. Sources, lowest precedence first: field defaults, the
/// TOML file named by `GEOFENCE_CONFIG`, then `GEOFENCE_*` variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    #[serde(default = "default_fallback_timeout_ms")]
    pub fallback_timeout_ms: u64,
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_dedup_sweep_interval_secs")]
    pub dedup_sweep_interval_secs: u64,
    #[serde(default = "default_dedup_soft_capacity")]
    pub dedup_soft_capacity: usize,
    #[serde(default = "default_max_fix_age_secs")]
    pub max_fix_age_secs: i64,
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: i64,
    #[serde(default = "default_max_accuracy_meters")]
    pub max_accuracy_meters: f64,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_refresh_interval_secs() -> u64 {
    1800
}

fn default_refresh_timeout_ms() -> u64 {
    30_000
}

fn default_fallback_timeout_ms() -> u64 {
    2000
}

fn default_dedup_window_secs() -> u64 {
    300
}

fn default_dedup_sweep_interval_secs() -> u64 {
    60
}

fn default_dedup_soft_capacity() -> usize {
    100_000
}

fn default_max_fix_age_secs() -> i64 {
    60
}

fn default_max_clock_skew_secs() -> i64 {
    60
}

fn default_max_accuracy_meters() -> f64 {
    50.0
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        let path = env::var(CONFIG_PATH_VAR).ok();
        Self::from_sources(path.as_deref().map(Path::new))
    }

    pub fn from_sources(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = file {
            let path = path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("config path is not valid UTF-8: {}", path.display()))?;
            builder = builder.add_source(File::new(path, FileFormat::Toml).required(true));
        }
        builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let settings: Settings = builder
            .build()?
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
        settings.check()?;
        Ok(settings)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("database_url must not be empty");
        }
        if self.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be positive");
        }
        if self.dedup_sweep_interval_secs == 0 {
            anyhow::bail!("dedup_sweep_interval_secs must be positive");
        }
        if self.max_accuracy_meters.is_nan() || self.max_accuracy_meters < 0.0 {
            anyhow::bail!("max_accuracy_meters must not be negative");
        }
        if i64::try_from(self.dedup_window_secs).map_or(true, |secs| secs > MAX_DURATION_SECS) {
            anyhow::bail!("dedup_window_secs must be at most {}", MAX_DURATION_SECS);
        }
        for (name, secs) in [
            ("max_fix_age_secs", self.max_fix_age_secs),
            ("max_clock_skew_secs", self.max_clock_skew_secs),
        ] {
            if !(0..=MAX_DURATION_SECS).contains(&secs) {
                anyhow::bail!("{} must be between 0 and {}", name, MAX_DURATION_SECS);
            }
        }
        Ok(())
    }

    pub fn detection_config(&self) -> DetectionConfig {
        DetectionConfig {
            fix_policy: FixPolicy {
                max_age: bounded_secs(self.max_fix_age_secs),
                max_clock_skew: bounded_secs(self.max_clock_skew_secs),
                max_accuracy_meters: self.max_accuracy_meters,
            },
            fallback_timeout: Duration::from_millis(self.fallback_timeout_ms),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    pub fn dedup_window(&self) -> chrono::Duration {
        bounded_secs(i64::try_from(self.dedup_window_secs).unwrap_or(MAX_DURATION_SECS))
    }

    pub fn dedup_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dedup_sweep_interval_secs)
    }
}

/// Settings built by hand skip `check`, so conversions clamp as well.
fn bounded_secs(secs: i64) -> chrono::Duration {
    chrono::Duration::seconds(secs.clamp(0, MAX_DURATION_SECS))
}
