//! Diagnostic findings emitted by detectors
//!
//! # Issues Detected
//!
//! ## 1. Main-thread I/O
//! Any file I/O performed on the latency-sensitive thread.
//! - **Impact:** frame drops, input lag, watchdog timeouts
//! - **Fix:** move the I/O to a background thread
//!
//! ## 2. Small buffer
//! Many read/write calls, none of which used a reasonably sized buffer.
//! - **Impact:** syscall overhead dominates the transfer cost
//! - **Fix:** wrap the descriptor in a buffered reader/writer
//!
//! ## 3. Repeat read
//! The same call site reads the same file the same way several times in a
//! short burst.
//! - **Impact:** wasted I/O on data that could have been cached
//! - **Fix:** cache the content after the first read

use crate::io_info::{AccessMode, IoInfo, OpType};
use serde::{Deserialize, Serialize};

/// Severity level for issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Minor optimization opportunity
    Low,
    /// Noticeable latency impact
    Medium,
    /// Significant stall
    High,
}

/// Kind of an issue, without its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MainThreadIo,
    SmallBuffer,
    RepeatRead,
}

/// Reportable fields of the record that triggered an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoSnapshot {
    pub path: String,
    pub access_mode: AccessMode,
    pub op_type: OpType,
    pub op_count: u64,
    pub op_size_total: u64,
    pub buffer_size_max: u64,
    pub rw_cost_total_us: u64,
    pub max_single_op_cost_us: u64,
    pub max_continual_rw_us: u64,
    pub total_cost_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    pub thread_id: i64,
    pub thread_name: String,
}

impl From<&IoInfo> for IoSnapshot {
    fn from(info: &IoInfo) -> Self {
        Self {
            path: info.path.clone(),
            access_mode: info.access_mode(),
            op_type: info.op_type,
            op_count: info.op_count,
            op_size_total: info.op_size_total,
            buffer_size_max: info.buffer_size_max,
            rw_cost_total_us: info.rw_cost_total_us,
            max_single_op_cost_us: info.max_single_op_cost_us,
            max_continual_rw_us: info.max_continual_rw_us,
            total_cost_us: info.total_cost_us,
            file_size_bytes: info.file_size_bytes,
            thread_id: info.call_site.thread_id,
            thread_name: info.call_site.thread_name.clone(),
        }
    }
}

/// Kind-specific data carried by an issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IssueDetail {
    MainThreadIo {
        severity: Severity,
    },
    SmallBuffer {
        /// Average bytes per call
        average_op_size: u64,
    },
    RepeatRead {
        repeat_read_count: u32,
        /// Bytes moved per read in the repeated pattern
        op_size: u64,
    },
}

/// One finding tied to a finalized descriptor record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(flatten)]
    pub detail: IssueDetail,
    pub io: IoSnapshot,
    /// Stack of the call site that opened the descriptor
    pub stack: String,
}

impl Issue {
    pub fn new(info: &IoInfo, detail: IssueDetail) -> Self {
        Self {
            detail,
            io: IoSnapshot::from(info),
            stack: info.call_site.stack.clone(),
        }
    }

    pub fn kind(&self) -> IssueKind {
        match self.detail {
            IssueDetail::MainThreadIo { .. } => IssueKind::MainThreadIo,
            IssueDetail::SmallBuffer { .. } => IssueKind::SmallBuffer,
            IssueDetail::RepeatRead { .. } => IssueKind::RepeatRead,
        }
    }

    /// Get the name of this issue
    pub fn name(&self) -> &'static str {
        match self.kind() {
            IssueKind::MainThreadIo => "Main-Thread I/O",
            IssueKind::SmallBuffer => "Small Buffer",
            IssueKind::RepeatRead => "Repeat Read",
        }
    }

    pub fn severity(&self) -> Severity {
        match &self.detail {
            IssueDetail::MainThreadIo { severity } => *severity,
            IssueDetail::SmallBuffer { .. } => Severity::Medium,
            IssueDetail::RepeatRead { .. } => Severity::Medium,
        }
    }

    /// Repeat count for repeat-read issues
    pub fn repeat_read_count(&self) -> Option<u32> {
        match self.detail {
            IssueDetail::RepeatRead {
                repeat_read_count, ..
            } => Some(repeat_read_count),
            _ => None,
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> String {
        match &self.detail {
            IssueDetail::MainThreadIo { .. } => format!(
                "'{}' accessed on thread {} ({}): {} ops, {}us in I/O, longest continual block {}us.",
                self.io.path,
                self.io.thread_id,
                self.io.thread_name,
                self.io.op_count,
                self.io.rw_cost_total_us,
                self.io.max_continual_rw_us
            ),
            IssueDetail::SmallBuffer { average_op_size } => format!(
                "'{}' used {} calls with buffers of at most {} bytes (average {} bytes/call).",
                self.io.path, self.io.op_count, self.io.buffer_size_max, average_op_size
            ),
            IssueDetail::RepeatRead {
                repeat_read_count,
                op_size,
            } => format!(
                "'{}' read {} times in a row by the same call site ({} bytes each time).",
                self.io.path, repeat_read_count, op_size
            ),
        }
    }

    /// Get recommended fix
    pub fn recommendation(&self) -> &'static str {
        match self.kind() {
            IssueKind::MainThreadIo => {
                "Move file I/O off the main thread. \
                 Use a background worker or async I/O."
            }
            IssueKind::SmallBuffer => {
                "Use a buffered reader/writer or a larger buffer \
                 to reduce the number of syscalls."
            }
            IssueKind::RepeatRead => {
                "Cache the file content after the first read \
                 instead of re-reading it."
            }
        }
    }
}
