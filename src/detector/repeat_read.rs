//! Repeat-read detection
//!
//! Keeps, per path, the distinct read fingerprints seen during the current
//! burst of activity. A fingerprint is the tuple
//! `(path, thread_id, stack, file_size, op_size)`; the byte offset is not
//! observed at this layer and is not part of it.
//!
//! # Algorithm
//!
//! 1. An unseen path is only tracked once one of its records shows a
//!    continual block of at least `possible_negative_threshold_us`.
//! 2. A write clears the path's history.
//! 3. The first fingerprint of a burst is recorded as a baseline.
//! 4. If more than [`REPEAT_READ_WINDOW_MS`] passed since the newest entry
//!    was recorded, the burst is over and the history is cleared.
//! 5. An equivalent entry has its count incremented; a new fingerprint is
//!    appended.
//! 6. The read that brings a count to `repeat_read_threshold` is reported.
//!
//! Entries are stamped when appended, not when matched, so a burst of
//! identical reads has to complete within the window of its baseline.

use super::{DetectError, Detector, DetectorKind};
use crate::clock::Clock;
use crate::config::Env;
use crate::io_info::{IoInfo, OpType};
use crate::issue::{Issue, IssueDetail};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Gap after which earlier reads stop counting as the same burst
pub const REPEAT_READ_WINDOW_MS: u64 = 17;

/// Fingerprint of one read pattern and how often it recurred
#[derive(Debug, Clone)]
pub struct RepeatReadInfo {
    pub path: String,
    pub stack: String,
    pub thread_id: i64,
    pub op_size: u64,
    pub file_size: Option<u64>,
    pub observed_at_ms: u64,
    pub repeat_count: u32,
}

impl RepeatReadInfo {
    fn from_record(info: &IoInfo, observed_at_ms: u64) -> Self {
        Self {
            path: info.path.clone(),
            stack: info.call_site.stack.clone(),
            thread_id: info.call_site.thread_id,
            op_size: info.op_size_total,
            file_size: info.file_size_bytes,
            observed_at_ms,
            repeat_count: 1,
        }
    }
}

/// Content equality; the timestamp and the count are not compared
impl PartialEq for RepeatReadInfo {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.thread_id == other.thread_id
            && self.stack == other.stack
            && self.file_size == other.file_size
            && self.op_size == other.op_size
    }
}

impl Eq for RepeatReadInfo {}

/// Flags the same call site re-reading the same file in a tight burst
pub struct RepeatReadDetector {
    observing: HashMap<String, Vec<RepeatReadInfo>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RepeatReadDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeatReadDetector")
            .field("observed_paths", &self.observing.len())
            .finish_non_exhaustive()
    }
}

impl RepeatReadDetector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            observing: HashMap::new(),
            clock,
        }
    }

    /// Fingerprints currently held for `path`, oldest first
    pub fn history(&self, path: &str) -> Option<&[RepeatReadInfo]> {
        self.observing.get(path).map(Vec::as_slice)
    }

    pub fn is_observing(&self, path: &str) -> bool {
        self.observing.contains_key(path)
    }
}

impl Detector for RepeatReadDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::RepeatRead
    }

    fn detect(
        &mut self,
        env: &Env,
        info: &IoInfo,
        issues: &mut Vec<Issue>,
    ) -> Result<(), DetectError> {
        if info.path.is_empty() {
            return Err(DetectError::MalformedRecord("empty path"));
        }

        if !self.observing.contains_key(&info.path) {
            if info.max_continual_rw_us < env.possible_negative_threshold_us {
                return Ok(());
            }
            self.observing.insert(info.path.clone(), Vec::new());
        }

        let Some(history) = self.observing.get_mut(&info.path) else {
            return Ok(());
        };

        match info.op_type {
            OpType::Write => {
                history.clear();
                return Ok(());
            }
            // Opened and closed without reading; nothing to compare
            OpType::Unset => return Ok(()),
            OpType::Read => {}
        }

        let now_ms = self.clock.now_ms();
        let candidate = RepeatReadInfo::from_record(info, now_ms);

        let Some(newest) = history.last() else {
            history.push(candidate);
            return Ok(());
        };

        if now_ms.saturating_sub(newest.observed_at_ms) > REPEAT_READ_WINDOW_MS {
            trace!(path = %info.path, "repeat-read window elapsed; history cleared");
            history.clear();
        }

        let Some(entry) = history.iter_mut().find(|entry| **entry == candidate) else {
            history.push(candidate);
            return Ok(());
        };

        entry.repeat_count += 1;
        trace!(path = %info.path, repeat_count = entry.repeat_count, "repeat read");

        if entry.repeat_count == env.repeat_read_threshold {
            issues.push(Issue::new(
                info,
                IssueDetail::RepeatRead {
                    repeat_read_count: entry.repeat_count,
                    op_size: entry.op_size,
                },
            ));
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.observing.clear();
    }
}
