//! Daemon configuration.
//!
//! One TOML file with per-component sections. Every field has a default so
//! a missing file or an empty table still yields a runnable configuration;
//! validation catches the combinations that cannot work.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    #[serde(default)]
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub draw: DrawConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
}

/// Canvas geometry and the snapshot endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CanvasConfig {
    #[serde(default = "default_canvas_width")]
    pub width: u32,
    #[serde(default = "default_canvas_height")]
    pub height: u32,
    #[serde(default = "default_snapshot_url")]
    pub snapshot_url: String,
    /// A cached snapshot younger than this satisfies a lazy refresh.
    #[serde(default = "default_staleness_threshold", with = "humantime_serde")]
    pub staleness_threshold: Duration,
}

/// Change-feed connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeedConfig {
    #[serde(default = "default_feed_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_heartbeat_interval", with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    #[serde(default = "default_reconnect_delay", with = "humantime_serde")]
    pub reconnect_delay: Duration,
}

/// Draw endpoint and worker health parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DrawConfig {
    #[serde(default = "default_draw_url")]
    pub url: String,
    /// Applied when a draw attempt yields no usable cooldown.
    #[serde(default = "default_fallback_cooldown", with = "humantime_serde")]
    pub fallback_cooldown: Duration,
    /// Consecutive auth rejections before a worker retires.
    #[serde(default = "default_auth_failure_threshold")]
    pub auth_failure_threshold: u32,
}

/// Clock overlay switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlayConfig {
    #[serde(default = "default_overlay_enabled")]
    pub enabled: bool,
}

const fn default_canvas_width() -> u32 {
    1280
}

const fn default_canvas_height() -> u32 {
    720
}

fn default_snapshot_url() -> String {
    "http://127.0.0.1:8080/canvas/bitmap".to_string()
}

const fn default_staleness_threshold() -> Duration {
    Duration::from_secs(60)
}

fn default_feed_endpoint() -> String {
    "127.0.0.1:2243".to_string()
}

const fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_reconnect_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_draw_url() -> String {
    "http://127.0.0.1:8080/canvas/draw".to_string()
}

const fn default_fallback_cooldown() -> Duration {
    Duration::from_secs(30)
}

const fn default_auth_failure_threshold() -> u32 {
    10
}

const fn default_overlay_enabled() -> bool {
    true
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: default_canvas_width(),
            height: default_canvas_height(),
            snapshot_url: default_snapshot_url(),
            staleness_threshold: default_staleness_threshold(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: default_feed_endpoint(),
            heartbeat_interval: default_heartbeat_interval(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

impl Default for DrawConfig {
    fn default() -> Self {
        Self {
            url: default_draw_url(),
            fallback_cooldown: default_fallback_cooldown(),
            auth_failure_threshold: default_auth_failure_threshold(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: default_overlay_enabled(),
        }
    }
}

impl GuardConfig {
    /// Load from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on read, parse, or validation failure.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on parse or validation failure.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.canvas.width == 0 || self.canvas.height == 0 {
            return Err(ConfigError::Validation(format!(
                "canvas dimensions must be nonzero, got {}x{}",
                self.canvas.width, self.canvas.height
            )));
        }
        if self.draw.auth_failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "draw.auth_failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.feed.heartbeat_interval.is_zero() {
            return Err(ConfigError::Validation(
                "feed.heartbeat_interval must be nonzero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serde adapter for human-readable durations ("30s", "5m") in TOML.
mod humantime_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
