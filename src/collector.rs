//! Live descriptor table
//!
//! Maps each open descriptor to its [`IoInfo`]. The collector is a plain
//! single-writer structure: every method takes `&mut self`, and the engine
//! serializes access to it. Ignorable input (failed syscalls, unknown
//! descriptors, negative costs, duplicate opens) is dropped where it arrives.

use crate::call_site::CallSite;
use crate::clock::Clock;
use crate::io_info::{IoInfo, OpType};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// Outcome of an `open` notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Tracked,
    /// The syscall failed; nothing to track
    Failed,
    /// The descriptor is still tracked from an earlier open
    Duplicate,
}

/// Tracks open descriptors and accumulates their I/O statistics
pub struct Collector {
    live: HashMap<i32, IoInfo>,
    clock: Arc<dyn Clock>,
    continual_threshold_us: u64,
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("live", &self.live.len())
            .field("continual_threshold_us", &self.continual_threshold_us)
            .finish_non_exhaustive()
    }
}

impl Collector {
    pub fn new(clock: Arc<dyn Clock>, continual_threshold_us: u64) -> Self {
        Self {
            live: HashMap::new(),
            clock,
            continual_threshold_us,
        }
    }

    pub fn set_continual_threshold(&mut self, continual_threshold_us: u64) {
        self.continual_threshold_us = continual_threshold_us;
    }

    pub fn on_open(
        &mut self,
        path: &str,
        flags: i32,
        _mode: u32,
        result: i32,
        call_site: CallSite,
    ) -> OpenOutcome {
        if result < 0 {
            return OpenOutcome::Failed;
        }

        if self.live.contains_key(&result) {
            warn!(fd = result, path, "open returned a descriptor that is still tracked; ignoring");
            return OpenOutcome::Duplicate;
        }

        let info = IoInfo::new(path, call_site, flags, self.clock.now_us());
        self.live.insert(result, info);
        OpenOutcome::Tracked
    }

    /// Returns true when the read was recorded
    pub fn on_read(&mut self, fd: i32, size: usize, result: isize, cost_us: i64) -> bool {
        self.count_rw(fd, OpType::Read, size, result, cost_us)
    }

    /// Returns true when the write was recorded
    pub fn on_write(&mut self, fd: i32, size: usize, result: isize, cost_us: i64) -> bool {
        self.count_rw(fd, OpType::Write, size, result, cost_us)
    }

    /// Finalize and forget a descriptor
    ///
    /// The record is returned even when `result` reports a failed close: the
    /// I/O history is valid either way.
    pub fn on_close(&mut self, fd: i32, result: i32) -> Option<IoInfo> {
        let mut info = self.live.remove(&fd)?;

        if result < 0 {
            trace!(fd, path = %info.path, "close failed; finalizing anyway");
        }

        let file_size = file_size(&info.path);
        info.finalize(self.clock.now_us(), file_size);
        Some(info)
    }

    pub fn is_tracked(&self, fd: i32) -> bool {
        self.live.contains_key(&fd)
    }

    pub fn get(&self, fd: i32) -> Option<&IoInfo> {
        self.live.get(&fd)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    fn count_rw(&mut self, fd: i32, op: OpType, size: usize, result: isize, cost_us: i64) -> bool {
        if result < 0 {
            return false;
        }

        // Negative cost means the timing sample is unreliable, not an error
        let Ok(cost_us) = u64::try_from(cost_us) else {
            trace!(fd, cost_us, "negative cost sample dropped");
            return false;
        };

        let Some(info) = self.live.get_mut(&fd) else {
            return false;
        };

        let now_us = self.clock.now_us();
        info.record_op(op, size as u64, cost_us, now_us, self.continual_threshold_us);
        true
    }
}

/// Best-effort stat of the file size at close time
fn file_size(path: &str) -> Option<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Some(meta.len()),
        Err(e) => {
            trace!(path, error = %e, "stat failed at close");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::io::Write;

    fn collector() -> (Collector, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (Collector::new(clock.clone(), 8_000), clock)
    }

    fn site() -> CallSite {
        CallSite::new(1, "main", "at open")
    }

    #[test]
    fn test_failed_open_is_ignored() {
        let (mut collector, _) = collector();
        assert_eq!(collector.on_open("/f", 0, 0, -1, site()), OpenOutcome::Failed);
        assert_eq!(collector.live_count(), 0);
    }

    #[test]
    fn test_duplicate_open_keeps_first_record() {
        let (mut collector, _) = collector();
        assert_eq!(collector.on_open("/first", 0, 0, 3, site()), OpenOutcome::Tracked);
        assert_eq!(collector.on_open("/second", 0, 0, 3, site()), OpenOutcome::Duplicate);
        assert_eq!(collector.get(3).unwrap().path, "/first");
    }

    #[test]
    fn test_descriptor_reuse_after_close() {
        let (mut collector, _) = collector();
        collector.on_open("/first", 0, 0, 3, site());
        assert!(collector.on_close(3, 0).is_some());
        assert_eq!(collector.on_open("/second", 0, 0, 3, site()), OpenOutcome::Tracked);
        assert_eq!(collector.get(3).unwrap().path, "/second");
    }

    #[test]
    fn test_read_on_untracked_descriptor_is_noop() {
        let (mut collector, _) = collector();
        collector.on_open("/f", 0, 0, 3, site());
        let before = collector.get(3).cloned();

        assert!(!collector.on_read(9, 100, 100, 10));
        assert!(!collector.on_write(9, 100, 100, 10));
        assert_eq!(collector.get(3).cloned(), before);
        assert!(!collector.is_tracked(9));
    }

    #[test]
    fn test_failed_or_negative_cost_ops_are_dropped() {
        let (mut collector, _) = collector();
        collector.on_open("/f", 0, 0, 3, site());
        assert!(!collector.on_read(3, 100, -1, 10));
        assert!(!collector.on_write(3, 100, 100, -5));
        assert_eq!(collector.get(3).unwrap().op_count, 0);
    }

    #[test]
    fn test_read_write_update_record() {
        let (mut collector, clock) = collector();
        collector.on_open("/f", 0, 0, 3, site());
        assert!(collector.on_read(3, 4096, 4096, 20));
        clock.advance_us(100);
        assert!(collector.on_write(3, 128, 128, 30));

        let info = collector.get(3).unwrap();
        assert_eq!(info.op_type, OpType::Read);
        assert_eq!(info.op_count, 2);
        assert_eq!(info.op_size_total, 4096 + 128);
        assert_eq!(info.buffer_size_max, 4096);
        assert_eq!(info.max_continual_rw_us, 50);
    }

    #[test]
    fn test_close_untracked_returns_none() {
        let (mut collector, _) = collector();
        assert!(collector.on_close(42, 0).is_none());
    }

    #[test]
    fn test_close_finalizes_and_forgets() {
        let (mut collector, clock) = collector();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 321]).unwrap();
        file.flush().unwrap();
        let path = file.path().to_str().unwrap().to_string();

        collector.on_open(&path, 0, 0, 5, site());
        clock.advance_us(2_500);
        let info = collector.on_close(5, -1).expect("failed close still finalizes");

        assert_eq!(info.total_cost_us, 2_500);
        assert_eq!(info.file_size_bytes, Some(321));
        assert!(!collector.is_tracked(5));
    }

    #[test]
    fn test_close_of_missing_file_uses_unknown_size() {
        let (mut collector, _) = collector();
        collector.on_open("/definitely/not/here", 0, 0, 5, site());
        let info = collector.on_close(5, 0).unwrap();
        assert_eq!(info.file_size_bytes, None);
    }
}
