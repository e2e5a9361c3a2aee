//! Configuration loading
//!
//! Bootstrap configuration comes from a TOML file resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable `AFC_CONFIG`
//! 3. Per-user config file (`~/.config/afc/afc-engine.toml`)
//! 4. Built-in defaults (fallback)
//!
//! A missing file is not an error: the engine logs a warning and starts with
//! defaults. A file that exists but does not parse is an error.

use crate::{Error, Result};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "AFC_CONFIG";

/// Environment variable carrying the search-index API key
pub const SEARCH_API_KEY_ENV_VAR: &str = "AFC_SEARCH_API_KEY";

/// Engine configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// HTTP port for the callable surface
    #[serde(default = "default_port")]
    pub port: u16,

    /// Business timezone as minutes east of UTC (sweep times, event confirmations)
    #[serde(default = "default_local_utc_offset_minutes")]
    pub local_utc_offset_minutes: i32,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub afc: AfcConfig,

    #[serde(default)]
    pub sweep: SweepConfig,

    #[serde(default)]
    pub import: ImportConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub search_index: SearchIndexConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides it
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Follow-up schedule: step → day offset from the moment of scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AfcConfig {
    #[serde(default = "default_schedule")]
    pub schedule: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Local wall-clock times ("HH:MM") at which the unresponsive sweep runs
    #[serde(default = "default_sweep_times")]
    pub times: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Operations per write batch (one below the store's hard limit of 500)
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Would-be leads returned by a dry run
    #[serde(default = "default_preview_size")]
    pub preview_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum total time to retry a transaction on lock contention
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,

    /// Change-notification channel capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchIndexConfig {
    /// Base URL of the search index; unset disables the push
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_search_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("afc").join("afc.db"))
        .unwrap_or_else(|| PathBuf::from("./afc_data/afc.db"))
}

fn default_port() -> u16 {
    5730
}

fn default_local_utc_offset_minutes() -> i32 {
    240 // UTC+04:00
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_schedule() -> BTreeMap<String, u32> {
    [(1, 1), (2, 3), (3, 5), (4, 7), (5, 15)]
        .into_iter()
        .map(|(step, days)| (step.to_string(), days))
        .collect()
}

fn default_true() -> bool {
    true
}

fn default_sweep_times() -> Vec<String> {
    vec!["09:30".to_string(), "18:30".to_string()]
}

fn default_batch_limit() -> usize {
    499
}

fn default_preview_size() -> usize {
    3
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_event_capacity() -> usize {
    1000
}

fn default_search_timeout_ms() -> u64 {
    3000
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            port: default_port(),
            local_utc_offset_minutes: default_local_utc_offset_minutes(),
            logging: LoggingConfig::default(),
            afc: AfcConfig::default(),
            sweep: SweepConfig::default(),
            import: ImportConfig::default(),
            store: StoreConfig::default(),
            search_index: SearchIndexConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Default for AfcConfig {
    fn default() -> Self {
        Self { schedule: default_schedule() }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            times: default_sweep_times(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            preview_size: default_preview_size(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_lock_wait_ms: default_max_lock_wait_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl AfcConfig {
    /// Schedule keyed by numeric step
    ///
    /// Steps must be 1..=255 and contiguous from 1, since the cycle advances
    /// one step at a time and ends at the first missing entry.
    pub fn steps(&self) -> Result<BTreeMap<u8, u32>> {
        let mut steps = BTreeMap::new();
        for (key, days) in &self.schedule {
            let step: u8 = key
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("AFC schedule step '{}' is not a number", key)))?;
            if step == 0 {
                return Err(Error::Config("AFC schedule step 0 is reserved for 'idle'".to_string()));
            }
            steps.insert(step, *days);
        }
        if steps.is_empty() {
            return Err(Error::Config("AFC schedule is empty".to_string()));
        }
        for (expected, step) in (1u8..).zip(steps.keys()) {
            if *step != expected {
                return Err(Error::Config(format!(
                    "AFC schedule must be contiguous from step 1 (missing step {})",
                    expected
                )));
            }
        }
        Ok(steps)
    }
}

impl SweepConfig {
    /// Parsed wall-clock times, sorted
    pub fn parsed_times(&self) -> Result<Vec<NaiveTime>> {
        let mut times = self
            .times
            .iter()
            .map(|t| {
                NaiveTime::parse_from_str(t.trim(), "%H:%M")
                    .map_err(|e| Error::Config(format!("Invalid sweep time '{}': {}", t, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        times.sort();
        times.dedup();
        Ok(times)
    }
}

impl TomlConfig {
    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        self.afc.steps()?;
        self.sweep.parsed_times()?;
        if self.import.batch_limit == 0 {
            return Err(Error::Config("import.batch_limit must be at least 1".to_string()));
        }
        if self.store.event_capacity == 0 {
            return Err(Error::Config("store.event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Resolve which config file to read, if any
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config file
    let user_config = dirs::config_dir().map(|d| d.join("afc").join("afc-engine.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    // Priority 4: built-in defaults
    None
}

/// Load configuration from `path`, falling back to defaults when absent
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let config = match path {
        None => {
            info!("No config file found, using built-in defaults");
            TomlConfig::default()
        }
        Some(path) if !path.exists() => {
            warn!("Config file {} not found, using built-in defaults", path.display());
            TomlConfig::default()
        }
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
            let config: TomlConfig = toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
            info!("Loaded config from {}", path.display());
            config
        }
    };

    config.validate()?;
    Ok(config)
}

/// Resolve the search-index API key
///
/// **Priority:** ENV → TOML
pub fn resolve_search_api_key(config: &TomlConfig) -> Option<String> {
    let env_key = std::env::var(SEARCH_API_KEY_ENV_VAR)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = config.search_index.api_key.clone().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!("Search API key found in both environment and TOML. Using environment.");
    }

    env_key.or(toml_key)
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_schedule_matches_follow_up_cadence() {
        let steps = AfcConfig::default().steps().unwrap();
        let pairs: Vec<(u8, u32)> = steps.into_iter().collect();
        assert_eq!(pairs, vec![(1, 1), (2, 3), (3, 5), (4, 7), (5, 15)]);
    }

    #[test]
    fn test_schedule_with_gap_is_rejected() {
        let mut afc = AfcConfig::default();
        afc.schedule.remove("3");
        assert!(matches!(afc.steps(), Err(Error::Config(_))));
    }

    #[test]
    fn test_schedule_step_zero_is_rejected() {
        let mut afc = AfcConfig::default();
        afc.schedule.insert("0".to_string(), 2);
        assert!(afc.steps().is_err());
    }

    #[test]
    fn test_sweep_times_sorted_and_validated() {
        let sweep = SweepConfig {
            enabled: true,
            times: vec!["18:30".to_string(), "09:30".to_string()],
        };
        let times = sweep.parsed_times().unwrap();
        assert_eq!(times[0], NaiveTime::from_hms_opt(9, 30, 0).unwrap());

        let bad = SweepConfig {
            enabled: true,
            times: vec!["25:00".to_string()],
        };
        assert!(bad.parsed_times().is_err());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            port = 6001
            [import]
            batch_limit = 50
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 6001);
        assert_eq!(config.import.batch_limit, 50);
        assert_eq!(config.import.preview_size, 3);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_is_valid_key() {
        assert!(is_valid_key("abc"));
        assert!(!is_valid_key("   "));
    }
}
