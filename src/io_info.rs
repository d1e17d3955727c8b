//! Per-descriptor I/O accumulator
//!
//! An [`IoInfo`] is created when a descriptor is opened, updated by every
//! read/write on it, and finalized exactly once at close. After
//! finalization it is immutable and owned by the analysis pipeline.

use crate::call_site::CallSite;
use serde::{Deserialize, Serialize};

/// Kind of the first data operation seen on a descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpType {
    #[default]
    Unset,
    Read,
    Write,
}

/// Access mode requested in the `open(2)` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    Unknown,
}

impl AccessMode {
    pub fn from_open_flags(flags: i32) -> Self {
        match flags & libc::O_ACCMODE {
            libc::O_RDONLY => AccessMode::ReadOnly,
            libc::O_WRONLY => AccessMode::WriteOnly,
            libc::O_RDWR => AccessMode::ReadWrite,
            _ => AccessMode::Unknown,
        }
    }
}

/// Statistics accumulated for one descriptor between open and close
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoInfo {
    pub path: String,
    pub call_site: CallSite,
    pub open_flags: i32,
    pub start_time_us: u64,

    /// First operation wins; never overwritten afterwards
    pub op_type: OpType,
    pub op_count: u64,
    pub op_size_total: u64,
    pub rw_cost_total_us: u64,
    pub max_single_op_cost_us: u64,
    /// Largest buffer handed to a single call, not bytes moved in total
    pub buffer_size_max: u64,

    pub last_rw_time_us: Option<u64>,
    pub current_continual_rw_us: u64,
    pub max_continual_rw_us: u64,

    /// Set at close
    pub total_cost_us: u64,
    /// Set at close; `None` when the file could not be stat'ed
    pub file_size_bytes: Option<u64>,
}

impl IoInfo {
    pub fn new(
        path: impl Into<String>,
        call_site: CallSite,
        open_flags: i32,
        start_time_us: u64,
    ) -> Self {
        Self {
            path: path.into(),
            call_site,
            open_flags,
            start_time_us,
            op_type: OpType::Unset,
            op_count: 0,
            op_size_total: 0,
            rw_cost_total_us: 0,
            max_single_op_cost_us: 0,
            buffer_size_max: 0,
            last_rw_time_us: None,
            current_continual_rw_us: 0,
            max_continual_rw_us: 0,
            total_cost_us: 0,
            file_size_bytes: None,
        }
    }

    pub fn access_mode(&self) -> AccessMode {
        AccessMode::from_open_flags(self.open_flags)
    }

    /// Fold one successful read or write into the counters
    ///
    /// A call whose timestamp is within `continual_threshold_us` of the
    /// previous call extends the current continual run; otherwise the run
    /// restarts from this call's cost.
    pub fn record_op(
        &mut self,
        op: OpType,
        size: u64,
        cost_us: u64,
        now_us: u64,
        continual_threshold_us: u64,
    ) {
        self.op_count += 1;
        self.op_size_total = self.op_size_total.saturating_add(size);
        self.rw_cost_total_us = self.rw_cost_total_us.saturating_add(cost_us);
        self.max_single_op_cost_us = self.max_single_op_cost_us.max(cost_us);

        let continual = self
            .last_rw_time_us
            .is_some_and(|last| now_us.saturating_sub(last) < continual_threshold_us);
        self.current_continual_rw_us = if continual {
            self.current_continual_rw_us.saturating_add(cost_us)
        } else {
            cost_us
        };
        self.max_continual_rw_us = self.max_continual_rw_us.max(self.current_continual_rw_us);
        self.last_rw_time_us = Some(now_us);

        self.buffer_size_max = self.buffer_size_max.max(size);

        if self.op_type == OpType::Unset {
            self.op_type = op;
        }
    }

    /// Write the close-time fields
    pub fn finalize(&mut self, now_us: u64, file_size_bytes: Option<u64>) {
        self.total_cost_us = now_us.saturating_sub(self.start_time_us);
        self.file_size_bytes = file_size_bytes;
    }
}
