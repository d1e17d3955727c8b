//! CLI argument parsing for the trace replay tool

use crate::config::ConfigKey;
use crate::detector::DetectorKind;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for reported issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// One JSON object per issue
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "ioprobe")]
#[command(version)]
#[command(
    about = "Replay recorded file I/O events through the ioprobe detectors",
    long_about = None
)]
pub struct Cli {
    /// JSON-lines trace to replay ('-' reads stdin)
    #[arg(value_name = "TRACE", required_unless_present = "dump_config")]
    pub trace: Option<PathBuf>,

    /// TOML file with detector thresholds
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override one threshold, e.g. --set repeat_read_threshold=3 (repeatable)
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
    pub overrides: Vec<(ConfigKey, i64)>,

    /// Detector to enable; repeat for several (default: all)
    #[arg(short, long = "detector", value_enum, value_name = "DETECTOR")]
    pub detectors: Vec<DetectorKind>,

    /// Thread id treated as the main thread (overrides the config file)
    #[arg(long = "main-thread", value_name = "TID")]
    pub main_thread: Option<i64>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Print summary counters after the issues
    #[arg(short, long)]
    pub summary: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long = "dump-config")]
    pub dump_config: bool,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}

impl Cli {
    /// Detectors to register, in order
    pub fn detector_kinds(&self) -> Vec<DetectorKind> {
        if self.detectors.is_empty() {
            DetectorKind::ALL.to_vec()
        } else {
            self.detectors.clone()
        }
    }
}

/// Parse a `key=value` threshold override
fn parse_override(arg: &str) -> Result<(ConfigKey, i64), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{arg}'"))?;
    let key = ConfigKey::from_name(name.trim()).ok_or_else(|| {
        let known: Vec<_> = ConfigKey::ALL.iter().map(|k| k.name()).collect();
        format!("unknown key '{}' (expected one of: {})", name.trim(), known.join(", "))
    })?;
    let value = value
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("invalid value for {}: {e}", key.name()))?;
    Ok((key, value))
}
