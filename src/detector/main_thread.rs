use super::{DetectError, Detector, DetectorKind};
use crate::config::Env;
use crate::io_info::IoInfo;
use crate::issue::{Issue, IssueDetail, Severity};

/// Flags any file I/O performed on the latency-sensitive thread
///
/// Cost does not gate the issue: touching the disk from that thread is the
/// defect. Cost only grades it:
///
/// - **High:** a continual block longer than `main_thread_threshold_us`
/// - **Medium:** a single call or continual block at or above
///   `possible_negative_threshold_us`
/// - **Low:** everything else
///
/// Descriptors opened and closed without a single read or write are not
/// reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct MainThreadDetector;

impl MainThreadDetector {
    fn grade(env: &Env, info: &IoInfo) -> Severity {
        if info.max_continual_rw_us > env.main_thread_threshold_us {
            Severity::High
        } else if info.max_single_op_cost_us >= env.possible_negative_threshold_us
            || info.max_continual_rw_us >= env.possible_negative_threshold_us
        {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

impl Detector for MainThreadDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::MainThread
    }

    fn detect(
        &mut self,
        env: &Env,
        info: &IoInfo,
        issues: &mut Vec<Issue>,
    ) -> Result<(), DetectError> {
        if info.op_count == 0 || info.call_site.thread_id != env.main_thread_id() {
            return Ok(());
        }

        let severity = Self::grade(env, info);
        issues.push(Issue::new(info, IssueDetail::MainThreadIo { severity }));
        Ok(())
    }
}
