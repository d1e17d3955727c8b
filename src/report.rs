//! Rendering of issues and engine counters for the replay tool

use crate::cli::OutputFormat;
use crate::engine::EngineStats;
use crate::issue::{Issue, Severity};
use std::io::Write;

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Low => "LOW",
        Severity::Medium => "MEDIUM",
        Severity::High => "HIGH",
    }
}

/// Write one issue in the requested format
pub fn write_issue<W: Write>(
    out: &mut W,
    issue: &Issue,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => write_issue_text(out, issue),
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, issue)?;
            writeln!(out)?;
            Ok(())
        }
    }
}

fn write_issue_text<W: Write>(out: &mut W, issue: &Issue) -> anyhow::Result<()> {
    writeln!(out, "[{}] {}", severity_label(issue.severity()), issue.name())?;
    writeln!(out, "  {}", issue.description())?;
    writeln!(out, "  Fix: {}", issue.recommendation())?;
    if !issue.stack.is_empty() {
        writeln!(out, "  Opened at:")?;
        for frame in issue.stack.lines() {
            writeln!(out, "    {frame}")?;
        }
    }
    Ok(())
}

/// Write the end-of-run counters
pub fn write_summary<W: Write>(
    out: &mut W,
    stats: &EngineStats,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer(&mut *out, &serde_json::json!({ "summary": stats }))?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            writeln!(out, "─────────────────────────────────────────")?;
            writeln!(out, "descriptors tracked: {}", stats.opens_tracked)?;
            writeln!(out, "records analyzed:    {}", stats.records_analyzed)?;
            writeln!(out, "issues reported:     {}", stats.issues_published)?;
            if stats.duplicate_opens > 0 {
                writeln!(out, "duplicate opens:     {}", stats.duplicate_opens)?;
            }
            if stats.detector_failures > 0 {
                writeln!(out, "detector failures:   {}", stats.detector_failures)?;
            }
        }
    }
    Ok(())
}
