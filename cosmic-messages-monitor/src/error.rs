//! Error handling for the messages monitor
//!
//! Errors only surface while the monitor is being configured: compiling the
//! selector table, loading or saving a configuration file, or handing events to
//! a monitor that has already stopped. Once the monitor runs, every structural
//! lookup is optional and failures degrade to empty results plus a log line.
//!
//! ## Error Handling Patterns
//!
//! ```rust
//! use cosmic_messages_monitor::{MonitorError, Result, Selector};
//!
//! fn compile(name: &str, source: &str) -> Result<Selector> {
//!     Selector::parse(source).map_err(|reason| MonitorError::InvalidSelector {
//!         name: name.to_string(),
//!         reason,
//!     })
//! }
//!
//! assert!(compile("row", "[role=row]").is_ok());
//! assert!(compile("row", "[role=row").is_err());
//! ```
//!
//! ## Error Categories
//!
//! - **Configuration**: invalid selectors, unsupported table versions, bad
//!   timing values. These require a configuration change.
//! - **I/O and serialization**: reading or writing configuration files.
//! - **Runtime**: icon rendering failures and closed event channels. Icon
//!   failures are converted into an empty icon by the caller.

use thiserror::Error;

/// Result type for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Errors that can occur while configuring or driving a monitor
///
/// # Examples
///
/// ```rust
/// use cosmic_messages_monitor::MonitorError;
///
/// let error = MonitorError::Configuration("threshold must be positive".to_string());
/// assert_eq!(error.to_string(), "Configuration error: threshold must be positive");
/// assert!(error.is_configuration_error());
/// ```
#[derive(Error, Debug)]
pub enum MonitorError {
    /// I/O error while reading or writing configuration
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// A named entry of the structural query table failed to compile
    #[error("Invalid selector '{name}': {reason}")]
    InvalidSelector { name: String, reason: String },

    /// Selector table written for a layout version this build does not know
    #[error("Unsupported selector table version {found} (supported: {supported})")]
    UnsupportedSelectorVersion { found: u32, supported: u32 },

    /// Configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rendering an icon failed
    #[error("Icon render error: {0}")]
    IconRender(String),

    /// The monitor's event channel is closed
    #[error("Monitor event channel closed")]
    ChannelClosed,
}

impl MonitorError {
    /// Check if this error is fixed by editing the configuration
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            MonitorError::InvalidSelector { .. }
                | MonitorError::UnsupportedSelectorVersion { .. }
                | MonitorError::Configuration(_)
                | MonitorError::TomlDe(_)
        )
    }

    /// Check if the operation may succeed when retried
    ///
    /// Icon loads depend on the network and the host page, so a later
    /// request for the same row can succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MonitorError::IconRender(_) | MonitorError::Io(_))
    }

    /// Create an icon render error
    pub fn icon_render(msg: impl Into<String>) -> Self {
        MonitorError::IconRender(msg.into())
    }
}
