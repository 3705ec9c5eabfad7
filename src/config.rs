// src/config.rs

//! Runtime configuration for the `scanout` presentation pipeline.
//!
//! The configuration is a JSON document whose path is taken from the
//! `SCANOUT_CONFIG` environment variable. Every section and field has a
//! default, so a partial file (or no file at all) is valid.
//!
//! The list of display-controller device paths is deliberately not part of
//! the configuration: candidates are tried in a fixed order.

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "SCANOUT_CONFIG";

/// Process-wide configuration, loaded on first access.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub display: DisplayConfig,
    pub performance: PerformanceConfig,
    pub input: InputConfig,
}

impl Config {
    /// Loads the file named by `SCANOUT_CONFIG`, falling back to defaults.
    ///
    /// A missing variable means defaults. A file that cannot be read or
    /// parsed is reported with a warning and also yields defaults.
    pub fn load_or_default() -> Self {
        match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_file(Path::new(&path)).unwrap_or_else(|e| {
                warn!("Config: {:#}. Using defaults.", e);
                Self::default()
            }),
            None => {
                debug!("Config: {} not set, using defaults.", CONFIG_PATH_ENV);
                Self::default()
            }
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = Self::from_json(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        info!("Config: loaded {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

// --- Logging ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `env_logger` filter used when `RUST_LOG` is not set.
    pub filter: String,
    /// Prefix log lines with microsecond timestamps.
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            timestamps: true,
        }
    }
}

// --- Display ---

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    /// Reapply the controller configuration found at startup when the
    /// session is torn down. When false the display keeps showing the
    /// last presented frame until the next master takes over.
    pub restore_crtc_on_teardown: bool,
}

// --- Performance ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Log the measured frame rate.
    pub report_fps: bool,
    /// Length of one frame-rate measurement window.
    pub fps_interval_ms: u64,
}

impl PerformanceConfig {
    pub fn fps_interval(&self) -> Duration {
        Duration::from_millis(self.fps_interval_ms.max(1))
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig {
            report_fps: true,
            fps_interval_ms: 1000,
        }
    }
}

// --- Input ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    /// Open a keyboard event device.
    pub keyboard: bool,
    /// Open the PS/2-compatible mouse multiplexer.
    pub mouse: bool,
    /// Case-insensitive substring matched against evdev device names.
    pub keyboard_name_hint: String,
    pub mouse_device: PathBuf,
    /// Turn off echo and line buffering on stdin while the keyboard is open.
    pub raw_terminal: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            keyboard: true,
            mouse: true,
            keyboard_name_hint: "keyboard".to_string(),
            mouse_device: PathBuf::from("/dev/input/mice"),
            raw_terminal: true,
        }
    }
}
