//! Monitor Configuration
//!
//! Configuration management for the messages monitor. The file is TOML with
//! four sections: `[selectors]` (the structural query table), `[timing]`,
//! `[notifications]` and `[icons]`. Every field has a default, so an empty
//! file is a valid configuration.

use crate::error::{MonitorError, Result};
use crate::queries::{SelectorTable, StructuralQueries};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Monitor configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Structural query table
    #[serde(default)]
    pub selectors: SelectorTable,

    /// Badge debounce and reconciliation timing
    #[serde(default)]
    pub timing: TimingConfig,

    /// Notification emission
    #[serde(default)]
    pub notifications: NotificationConfig,

    /// Conversation icons
    #[serde(default)]
    pub icons: IconConfig,
}

/// Timing configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval of the badge evaluation timer in milliseconds
    #[serde(default = "default_badge_interval_ms")]
    pub badge_interval_ms: u64,

    /// Consecutive zero readings required before the badge clears
    #[serde(default = "default_zero_confirmation_threshold")]
    pub zero_confirmation_threshold: u32,

    /// How long start-up waits for the sidebar to appear, in milliseconds
    #[serde(default = "default_root_wait_timeout_ms")]
    pub root_wait_timeout_ms: u64,

    /// Poll interval while waiting for the sidebar, in milliseconds
    #[serde(default = "default_root_poll_interval_ms")]
    pub root_poll_interval_ms: u64,

    /// Rebuild the conversation list every this many timer ticks
    ///
    /// Safety net for mutations the observer missed. `0` disables it.
    #[serde(default = "default_list_refresh_ticks")]
    pub list_refresh_ticks: u64,
}

/// Notification configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Emit notifications at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Body used when the message preview is empty
    #[serde(default = "default_placeholder_body")]
    pub placeholder_body: String,

    /// Ask the collaborator to show notifications without sound
    #[serde(default)]
    pub silent: bool,
}

/// Icon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IconConfig {
    /// Rendered icon edge length in pixels
    #[serde(default = "default_icon_size")]
    pub size: u32,

    /// Icon source used when neither a profile picture nor a favicon exists
    #[serde(default = "default_favicon_url")]
    pub default_favicon_url: String,
}

fn default_badge_interval_ms() -> u64 {
    1000
}

fn default_zero_confirmation_threshold() -> u32 {
    3
}

fn default_root_wait_timeout_ms() -> u64 {
    30_000
}

fn default_root_poll_interval_ms() -> u64 {
    250
}

fn default_list_refresh_ticks() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_placeholder_body() -> String {
    "Sent a message".to_string()
}

fn default_icon_size() -> u32 {
    32
}

fn default_favicon_url() -> String {
    "https://www.messenger.com/favicon.ico".to_string()
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            badge_interval_ms: default_badge_interval_ms(),
            zero_confirmation_threshold: default_zero_confirmation_threshold(),
            root_wait_timeout_ms: default_root_wait_timeout_ms(),
            root_poll_interval_ms: default_root_poll_interval_ms(),
            list_refresh_ticks: default_list_refresh_ticks(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            placeholder_body: default_placeholder_body(),
            silent: false,
        }
    }
}

impl Default for IconConfig {
    fn default() -> Self {
        Self {
            size: default_icon_size(),
            default_favicon_url: default_favicon_url(),
        }
    }
}

impl TimingConfig {
    /// Get the badge timer interval as Duration
    pub fn badge_interval(&self) -> Duration {
        Duration::from_millis(self.badge_interval_ms)
    }

    /// Get the sidebar wait timeout as Duration
    pub fn root_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.root_wait_timeout_ms)
    }

    /// Get the sidebar poll interval as Duration
    pub fn root_poll_interval(&self) -> Duration {
        Duration::from_millis(self.root_poll_interval_ms)
    }

    /// Check if the list should be rebuilt on the given timer tick
    pub fn is_list_refresh_tick(&self, tick: u64) -> bool {
        self.list_refresh_ticks > 0 && tick > 0 && tick % self.list_refresh_ticks == 0
    }
}

impl MonitorConfig {
    /// Default configuration file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("cosmic")
            .join("cosmic-messages-monitor")
            .join("monitor.toml")
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: MonitorConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        info!("Loaded monitor configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults if it is missing
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        info!("Saved monitor configuration to {}", path.display());
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.compile_queries()?;

        if self.timing.zero_confirmation_threshold == 0 {
            return Err(MonitorError::Configuration(
                "zero_confirmation_threshold must be at least 1".to_string(),
            ));
        }
        if self.timing.badge_interval_ms == 0 {
            return Err(MonitorError::Configuration(
                "badge_interval_ms must be positive".to_string(),
            ));
        }
        if self.timing.root_poll_interval_ms == 0 {
            return Err(MonitorError::Configuration(
                "root_poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.icons.size == 0 {
            return Err(MonitorError::Configuration(
                "icon size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Compile the structural query table
    pub fn compile_queries(&self) -> Result<StructuralQueries> {
        self.selectors.compile()
    }
}
