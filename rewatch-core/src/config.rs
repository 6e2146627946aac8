//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/rewatch/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/rewatch/` (~/.config/rewatch/)
//! - Data: `$XDG_DATA_HOME/rewatch/` (~/.local/share/rewatch/)
//! - State/Logs: `$XDG_STATE_HOME/rewatch/` (~/.local/state/rewatch/)
//!
//! Every engine constant (segmentation gap, outcome thresholds, fallback
//! runtimes, timezone cutover, adherence weights) lives here so deployments
//! can override them without touching engine code.

use crate::error::{Error, Result};
use crate::types::ItemKind;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Engine constants (segmentation, thresholds, timezone correction)
    #[serde(default)]
    pub engine: EngineConfig,

    /// Media server connection
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine constants for session reconstruction and statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Gap between consecutive pings that starts a new session
    #[serde(default = "default_session_gap_minutes")]
    pub session_gap_minutes: i64,

    /// Fraction of runtime at or above which a session counts as completed
    #[serde(default = "default_completed_ratio")]
    pub completed_ratio: f64,

    /// Fraction of runtime at or above which a session counts as partial
    #[serde(default = "default_partial_ratio")]
    pub partial_ratio: f64,

    /// Minimum watched seconds for a session to count as sampled
    #[serde(default = "default_min_sampled_seconds")]
    pub min_sampled_seconds: i64,

    /// Instant at which the playback recorder switched to the canonical
    /// timezone ("%Y-%m-%d %H:%M:%S"); events strictly before it are shifted
    #[serde(default = "default_timezone_cutover")]
    pub timezone_cutover: String,

    /// Hours added to pre-cutover timestamps (UTC-7 recording regime to the
    /// canonical UTC+10 zone)
    #[serde(default = "default_timezone_shift_hours")]
    pub timezone_shift_hours: i64,

    /// Fallback thresholds and adherence weights for episodes
    #[serde(default = "KindProfile::episode")]
    pub episode: KindProfile,

    /// Fallback thresholds and adherence weights for movies
    #[serde(default = "KindProfile::movie")]
    pub movie: KindProfile,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_gap_minutes: default_session_gap_minutes(),
            completed_ratio: default_completed_ratio(),
            partial_ratio: default_partial_ratio(),
            min_sampled_seconds: default_min_sampled_seconds(),
            timezone_cutover: default_timezone_cutover(),
            timezone_shift_hours: default_timezone_shift_hours(),
            episode: KindProfile::episode(),
            movie: KindProfile::movie(),
        }
    }
}

impl EngineConfig {
    /// Parse the configured cutover instant.
    pub fn cutover(&self) -> Result<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timezone_cutover, "%Y-%m-%d %H:%M:%S").map_err(|e| {
            Error::Config(format!(
                "engine.timezone_cutover {:?} is not a valid timestamp: {}",
                self.timezone_cutover, e
            ))
        })
    }

    /// Per-kind constants, or None for kinds with no fallback profile.
    pub fn profile_for(&self, kind: ItemKind) -> Option<&KindProfile> {
        match kind {
            ItemKind::Episode => Some(&self.episode),
            ItemKind::Movie => Some(&self.movie),
            ItemKind::Other => None,
        }
    }
}

fn default_session_gap_minutes() -> i64 {
    15
}

fn default_completed_ratio() -> f64 {
    0.9
}

fn default_partial_ratio() -> f64 {
    0.25
}

fn default_min_sampled_seconds() -> i64 {
    60
}

fn default_timezone_cutover() -> String {
    "2025-08-15 11:10:00".to_string()
}

fn default_timezone_shift_hours() -> i64 {
    17
}

/// Per-kind constants: what stands in for an unknown runtime, the absolute
/// outcome thresholds used in that case, and the adherence-score weights.
///
/// Overriding `[engine.episode]` or `[engine.movie]` in config.toml replaces
/// the whole table for that kind.
#[derive(Debug, Clone, Deserialize)]
pub struct KindProfile {
    /// Divisor for completion ratios when the catalog runtime is unknown
    pub fallback_runtime_secs: i64,
    /// Absolute watched-second thresholds used when runtime is unknown
    pub completed_secs: i64,
    pub partial_secs: i64,
    pub sampled_secs: i64,
    /// Adherence-score blend for this kind
    pub adherence: AdherenceWeights,
}

impl KindProfile {
    /// Typical ~25 minute episode; repeat engagement weighs heavily.
    pub fn episode() -> Self {
        Self {
            fallback_runtime_secs: 1500,
            completed_secs: 1200,
            partial_secs: 300,
            sampled_secs: 60,
            adherence: AdherenceWeights {
                best_weight: 0.6,
                repeat_weight: 0.3,
                cumulative_weight: 0.1,
                repeat_cap: 3.0,
                cumulative_fallback_secs: 3600,
            },
        }
    }

    /// Typical ~2 hour movie; peak completion weighs heavily.
    pub fn movie() -> Self {
        Self {
            fallback_runtime_secs: 7200,
            completed_secs: 5400,
            partial_secs: 1800,
            sampled_secs: 300,
            adherence: AdherenceWeights {
                best_weight: 0.7,
                repeat_weight: 0.2,
                cumulative_weight: 0.1,
                repeat_cap: 2.0,
                cumulative_fallback_secs: 7200,
            },
        }
    }
}

/// Weights and caps for the adherence score.
///
/// The score blends: best single-session completion fraction, a saturating
/// repeat-engagement term min(1, sessions / repeat_cap), and a saturating
/// cumulative-time term min(1, total_watched / divisor). Weights must sum to
/// 1.0 for the score to stay in [0, 1].
#[derive(Debug, Clone, Deserialize)]
pub struct AdherenceWeights {
    pub best_weight: f64,
    pub repeat_weight: f64,
    pub cumulative_weight: f64,
    /// Session count at which the repeat term saturates
    pub repeat_cap: f64,
    /// Divisor for the cumulative term when the runtime is unknown
    pub cumulative_fallback_secs: i64,
}

/// Media server connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Base URL, expected format `https://[domain]/emby`
    pub base_url: Option<String>,

    /// API key for the media server
    pub api_key: Option<String>,

    /// Days of watch history to request per user
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,

    /// HTTP request timeout in seconds
    #[serde(default = "default_server_timeout")]
    pub timeout_secs: u64,

    /// Items per page when listing the library
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            lookback_days: default_lookback_days(),
            timeout_secs: default_server_timeout(),
            page_size: default_page_size(),
        }
    }
}

impl ServerConfig {
    /// Check whether enough is configured to talk to a server
    pub fn is_ready(&self) -> bool {
        self.base_url.is_some() && self.api_key.is_some()
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.base_url.is_none() {
            return Err(Error::Config("server.base_url is required".to_string()));
        }
        if self.api_key.is_none() {
            return Err(Error::Config("server.api_key is required".to_string()));
        }
        if self.page_size == 0 {
            return Err(Error::Config(
                "server.page_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_lookback_days() -> u32 {
    2000
}

fn default_server_timeout() -> u64 {
    30
}

fn default_page_size() -> usize {
    1000
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        // Fail early on an unparseable cutover instead of mid-run
        config.engine.cutover()?;

        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/rewatch/config.toml` (~/.config/rewatch/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("rewatch").join("config.toml")
    }

    /// Returns the data directory path (for the SQLite database)
    ///
    /// `$XDG_DATA_HOME/rewatch/` (~/.local/share/rewatch/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("rewatch")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/rewatch/` (~/.local/state/rewatch/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("rewatch")
    }

    /// Returns the database file path
    ///
    /// `$XDG_DATA_HOME/rewatch/watch.db` (~/.local/share/rewatch/watch.db)
    pub fn database_path() -> PathBuf {
        Self::data_dir().join("watch.db")
    }

    /// Returns the directory pre-refresh backups are written to
    pub fn backup_dir() -> PathBuf {
        Self::data_dir().join("backups")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/rewatch/rewatch.log` (~/.local/state/rewatch/rewatch.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("rewatch.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
