//! # EtherWave Configuration Module
//!
//! Typed configuration for the EtherWave playback engine:
//! - Loading from YAML files
//! - Environment variable override for the config path (`ETHERWAVE_CONFIG`)
//! - Sensible defaults for every tuning knob
//! - Validation with clamping of out-of-range values
//!
//! Unlike a global singleton, the configuration is a plain value passed to
//! the streamer and queue constructors, so embedders can run several
//! engines with different tunings in one process.
//!
//! ## Usage
//!
//! ```no_run
//! use ewconfig::PlayerConfig;
//!
//! let config = PlayerConfig::from_env_or_default()?;
//! assert_eq!(config.buffer_count, 16);
//! # Ok::<(), ewconfig::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const ENV_CONFIG_PATH: &str = "ETHERWAVE_CONFIG";
const CONFIG_FILE_NAME: &str = "etherwave.yaml";

/// Errors raised while loading or validating a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for this schema
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// A value is outside its permitted range and cannot be clamped
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Proxy flavor for outgoing stream connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Http,
    Socks,
}

/// Explicit proxy routing; absent means the system proxy applies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    /// Proxy URL in the scheme reqwest expects
    pub fn url(&self) -> String {
        let scheme = match self.kind {
            ProxyKind::Http => "http",
            ProxyKind::Socks => "socks5",
        };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Engine tuning knobs consumed by the streamer and the playback queue
///
/// All fields have defaults matching the values the engine was tuned with;
/// a config file only needs to list the fields it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Number of slots in the playback buffer ring
    pub buffer_count: usize,
    /// Capacity of one slot in bytes
    pub buffer_size: usize,
    /// Packet-count ceiling per slot
    pub max_packets_per_slot: usize,
    /// When true, never unschedule the reader; queued packets may grow
    /// without bound
    pub unbounded_buffering: bool,
    /// Watchdog interval in seconds; a tick with no I/O events fails the
    /// stream with a timeout
    pub timeout_secs: u64,
    /// Slots that must be submitted to the output before playback starts
    pub start_threshold_slots: usize,
    /// Packets observed before the bitrate estimate is trusted
    pub bitrate_window_packets: usize,
    /// Automatic reconnect attempts after a connection reset
    pub max_auto_retries: u32,
    /// User-triggered retry attempts before the queue gives up on a song
    pub max_manual_retries: u32,
    /// Explicit proxy; `None` uses the system proxy
    pub proxy: Option<ProxyConfig>,
    /// Initial queue volume, 0.0 to 1.0
    pub volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            buffer_count: 16,
            buffer_size: 2048,
            max_packets_per_slot: 512,
            unbounded_buffering: false,
            timeout_secs: 10,
            start_threshold_slots: 2,
            bitrate_window_packets: 50,
            max_auto_retries: 3,
            max_manual_retries: 2,
            proxy: None,
            volume: 1.0,
        }
    }
}

impl PlayerConfig {
    /// Load a configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: PlayerConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        info!(path = %path.display(), "loaded player configuration");
        Ok(config)
    }

    /// Load from `ETHERWAVE_CONFIG` if set, else from
    /// `~/.config/etherwave/etherwave.yaml` if present, else defaults.
    pub fn from_env_or_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
            return Self::load(path);
        }
        if let Some(dir) = dirs::config_dir() {
            let path = dir.join("etherwave").join(CONFIG_FILE_NAME);
            if path.exists() {
                return Self::load(path);
            }
        }
        Ok(Self::default())
    }

    /// Watchdog interval as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Clamp or reject out-of-range values
    ///
    /// Zero-sized buffers are rejected outright; soft values (volume,
    /// thresholds) are clamped with a warning.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.buffer_count == 0 {
            return Err(ConfigError::Invalid("buffer_count must be >= 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be >= 1".into()));
        }
        if self.max_packets_per_slot == 0 {
            return Err(ConfigError::Invalid(
                "max_packets_per_slot must be >= 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            warn!(volume = self.volume, "volume out of range, clamping");
            self.volume = self.volume.clamp(0.0, 1.0);
        }
        if self.start_threshold_slots > self.buffer_count {
            warn!(
                start_threshold_slots = self.start_threshold_slots,
                buffer_count = self.buffer_count,
                "start threshold exceeds ring size, clamping"
            );
            self.start_threshold_slots = self.buffer_count;
        }
        Ok(())
    }
}
