use std::env;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GrafoError, Result};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn default_min_attribute_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 10).unwrap_or_default()
}

fn default_min_matching_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_609_459_200, 0).unwrap_or_default() // 2021-01-01T00:00:00Z
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub storage: StorageConfig,
    pub attributes: AttributeConfig,
    pub matching: MatchingConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `GRAFO_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("GRAFO_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            storage: StorageConfig::from_env_profiled(p),
            attributes: AttributeConfig::from_env_profiled(p),
            matching: MatchingConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Reject values the scheduler or the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.attributes.validate()?;
        self.matching.validate()
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  storage:     data_dir={}, registry={}",
            self.storage.data_dir.display(),
            self.storage.registry_path.display()
        );
        tracing::info!(
            "  attributes:  window={}d, shift={}d, lag={}d, min_date={}",
            self.attributes.window_days,
            self.attributes.shift_days,
            self.attributes.ingestion_lag_days,
            self.attributes.min_date
        );
        tracing::info!(
            "  matching:    window={}h (max {}h), precision={} (max {}), threshold={}s",
            self.matching.initial_window_hours,
            self.matching.max_window_hours,
            self.matching.initial_precision,
            self.matching.max_precision,
            self.matching.time_threshold_secs
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::for_profile("")
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Per-region matching progress logs.
    pub progress_dir: PathBuf,
    /// Rejected coverage records awaiting manual reconciliation.
    pub inconsistent_dir: PathBuf,
    pub registry_path: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "DATA_DIR", "data"));
        let under_data = |key: &str, name: &str| {
            profiled_env_opt(p, key)
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join(name))
        };
        Self {
            progress_dir: under_data("PROGRESS_DIR", "progress"),
            inconsistent_dir: under_data("INCONSISTENT_DIR", "inconsistent"),
            registry_path: under_data("ENTITY_REGISTRY", "entities.json"),
            data_dir,
        }
    }
}

// ── Attribute scheduling ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeConfig {
    /// Length `W` of the trailing metric window.
    pub window_days: u32,
    /// Stride between consecutive as-of dates.
    pub shift_days: u32,
    /// Days between today and the last computable date.
    pub ingestion_lag_days: u32,
    /// Earliest starting date any metric may use.
    pub min_date: NaiveDate,
    /// Minimum distance from both ends of the case-report feed.
    pub freshness_days: u32,
    pub isolate_entity_failures: bool,
}

impl AttributeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            window_days: profiled_env_parse(p, "ATTRIBUTE_WINDOW_DAYS", 7),
            shift_days: profiled_env_parse(p, "ATTRIBUTE_SHIFT_DAYS", 3),
            ingestion_lag_days: profiled_env_parse(p, "INGESTION_LAG_DAYS", 4),
            min_date: profiled_env_parse(p, "ATTRIBUTE_MIN_DATE", default_min_attribute_date()),
            freshness_days: profiled_env_parse(p, "FRESHNESS_DAYS", 3),
            isolate_entity_failures: profiled_env_bool(p, "ISOLATE_ENTITY_FAILURES", false),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.window_days == 0 || self.shift_days == 0 {
            return Err(GrafoError::InvalidConfig(
                "attribute window and shift must be at least one day".into(),
            ));
        }
        if self.shift_days > self.window_days {
            return Err(GrafoError::InvalidConfig(format!(
                "shift ({}d) larger than window ({}d) leaves gaps between windows",
                self.shift_days, self.window_days
            )));
        }
        Ok(())
    }
}

// ── Matching ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Matching never looks at pings older than this.
    pub min_time: DateTime<Utc>,
    pub initial_window_hours: u32,
    pub max_window_hours: u32,
    pub min_window_hours: u32,
    pub window_step_hours: u32,
    pub initial_precision: u32,
    pub max_precision: u32,
    pub precision_step: u32,
    pub time_threshold_secs: f64,
    pub backoff_secs: u64,
    pub raw_table: String,
    pub contacts_table: String,
}

impl MatchingConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            min_time: profiled_env_parse(p, "MATCHING_MIN_TIME", default_min_matching_time()),
            initial_window_hours: profiled_env_parse(p, "MATCHING_WINDOW_HOURS", 12),
            max_window_hours: profiled_env_parse(p, "MATCHING_MAX_WINDOW_HOURS", 24),
            min_window_hours: profiled_env_parse(p, "MATCHING_MIN_WINDOW_HOURS", 1),
            window_step_hours: profiled_env_parse(p, "MATCHING_WINDOW_STEP_HOURS", 6),
            initial_precision: profiled_env_parse(p, "MATCHING_PRECISION", 30),
            max_precision: profiled_env_parse(p, "MATCHING_MAX_PRECISION", 30),
            precision_step: profiled_env_parse(p, "MATCHING_PRECISION_STEP", 2),
            time_threshold_secs: profiled_env_parse(p, "MATCHING_THRESHOLD_SECS", 30.0),
            backoff_secs: profiled_env_parse(p, "MATCHING_BACKOFF_SECS", 5),
            raw_table: profiled_env_or(p, "RAW_PINGS_TABLE", "raw_pings"),
            contacts_table: profiled_env_or(p, "CONTACTS_TABLE", "contacts"),
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(GrafoError::InvalidConfig(msg));
        if self.min_window_hours == 0 {
            return invalid("matching window floor must be at least one hour".into());
        }
        if self.min_window_hours > self.max_window_hours
            || !(self.min_window_hours..=self.max_window_hours).contains(&self.initial_window_hours)
        {
            return invalid(format!(
                "matching window {}h outside [{}h, {}h]",
                self.initial_window_hours, self.min_window_hours, self.max_window_hours
            ));
        }
        if self.precision_step == 0 || self.window_step_hours == 0 {
            return invalid("matching steps must be positive".into());
        }
        if self.initial_precision > self.max_precision {
            return invalid(format!(
                "matching precision {} above cap {}",
                self.initial_precision, self.max_precision
            ));
        }
        Ok(())
    }
}
