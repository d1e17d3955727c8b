//! Serializable I/O events
//!
//! One [`IoEvent`] per intercepted syscall. Traces are stored as JSON lines,
//! one event per line:
//!
//! ```text
//! {"event":"open","path":"/data/f","result":3,"call_site":{"thread_id":1},"at_us":0}
//! {"event":"read","fd":3,"size":4096,"result":4096,"cost_us":20000,"at_us":100}
//! {"event":"close","fd":3,"result":0,"at_us":20200}
//! ```

use crate::call_site::CallSite;
use serde::{Deserialize, Serialize};
use std::io::BufRead;

/// One intercepted syscall and its outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IoEvent {
    Open {
        path: String,
        #[serde(default)]
        flags: i32,
        #[serde(default)]
        mode: u32,
        result: i32,
        #[serde(default)]
        call_site: CallSite,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at_us: Option<u64>,
    },
    Read {
        fd: i32,
        size: usize,
        result: isize,
        cost_us: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at_us: Option<u64>,
    },
    Write {
        fd: i32,
        size: usize,
        result: isize,
        cost_us: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at_us: Option<u64>,
    },
    Close {
        fd: i32,
        #[serde(default)]
        result: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        at_us: Option<u64>,
    },
}

impl IoEvent {
    /// Timestamp recorded with the event, if any
    pub fn at_us(&self) -> Option<u64> {
        match self {
            IoEvent::Open { at_us, .. }
            | IoEvent::Read { at_us, .. }
            | IoEvent::Write { at_us, .. }
            | IoEvent::Close { at_us, .. } => *at_us,
        }
    }
}

/// Parse a JSON-lines trace. Blank lines and `#` comments are skipped.
pub fn read_trace<R: BufRead>(reader: R) -> anyhow::Result<Vec<IoEvent>> {
    use anyhow::Context;

    let mut events = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read trace line {}", index + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: IoEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid event on line {}", index + 1))?;
        events.push(event);
    }
    Ok(events)
}
