//! COSMIC Messages Replay
//!
//! Diagnostic tool for the conversation sidebar monitor. It replays a recorded
//! sidebar trace through a real monitor and prints every message the monitor
//! publishes (conversation lists, notifications, badge updates) as one JSON
//! line on stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```text
//! cosmic-messages-replay traces/alice.json
//! cosmic-messages-replay --config monitor.toml --debug trace.json
//! cosmic-messages-replay --write-default-config ~/.config/cosmic/cosmic-messages-monitor/monitor.toml
//! ```
//!
//! Selector tables can be tried against a captured page before they are
//! deployed: when the host page changes its markup, replaying an old trace
//! with a new table shows whether unread detection still works.

use anyhow::{Context, Result};
use clap::Parser;
use cosmic_messages_monitor::{MonitorConfig, Outbound};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod scenario;

use scenario::Trace;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "cosmic-messages-replay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Trace file to replay (JSON)
    #[arg(required_unless_present = "write_default_config")]
    trace: Option<PathBuf>,

    /// Monitor configuration file (defaults to the user configuration)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Write the default configuration to PATH and exit
    #[arg(long, value_name = "PATH")]
    write_default_config: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display())),
        None => {
            let path = MonitorConfig::default_path();
            MonitorConfig::load_or_default(&path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
    }
}

/// One output line: the published message plus a timestamp
fn output_line(message: &Outbound) -> Result<String> {
    let mut value = serde_json::to_value(message).context("Failed to serialize message")?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "timestamp".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
    }
    serde_json::to_string(&value).context("Failed to serialize message")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();

    if let Some(path) = &args.write_default_config {
        MonitorConfig::default()
            .save(path)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
        info!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let Some(trace_path) = &args.trace else {
        anyhow::bail!("No trace file given");
    };

    let config = load_config(args.config.as_deref())?;
    let contents = std::fs::read_to_string(trace_path)
        .with_context(|| format!("Failed to read trace {}", trace_path.display()))?;
    let trace = Trace::from_json(&contents)?;

    info!(
        "Replaying {} steps from {}",
        trace.steps.len(),
        trace_path.display()
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let stats = scenario::replay(&trace, config, |message| {
        writeln!(out, "{}", output_line(message)?).context("Failed to write to stdout")
    })
    .await?;

    info!(
        "Replay finished: {} batches, {} rebuilds, {} notifications, {} duplicates suppressed, {} badge evaluations",
        stats.batches,
        stats.rebuilds,
        stats.notifications_emitted,
        stats.duplicates_suppressed,
        stats.badge_evaluations
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_args_parsing() {
        let args = Args::parse_from(["cosmic-messages-replay", "trace.json"]);
        assert_eq!(args.trace, Some(PathBuf::from("trace.json")));
        assert!(args.config.is_none());
        assert!(!args.debug);
        assert!(args.write_default_config.is_none());
    }

    #[test]
    fn test_args_with_options() {
        let args = Args::parse_from([
            "cosmic-messages-replay",
            "--config",
            "monitor.toml",
            "--debug",
            "trace.json",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("monitor.toml")));
        assert!(args.debug);
    }

    #[test]
    fn test_trace_required_unless_writing_config() {
        assert!(Args::try_parse_from(["cosmic-messages-replay"]).is_err());

        let args = Args::try_parse_from([
            "cosmic-messages-replay",
            "--write-default-config",
            "out.toml",
        ])
        .unwrap();
        assert!(args.trace.is_none());
    }

    #[test]
    fn test_output_line() {
        let line = output_line(&Outbound::UpdateTrayIcon(2)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["topic"], "update-tray-icon");
        assert_eq!(value["payload"], 2);
        assert!(chrono::DateTime::parse_from_rfc3339(value["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_load_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(&path, "[timing]\nzero_confirmation_threshold = 4\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.timing.zero_confirmation_threshold, 4);

        let error = load_config(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(error.to_string().contains("missing.toml"));
    }
}
