use super::{DetectError, Detector, DetectorKind};
use crate::config::Env;
use crate::io_info::IoInfo;
use crate::issue::{Issue, IssueDetail};

/// Flags descriptors driven by many calls with small buffers
///
/// A record qualifies when it made more than
/// `small_buffer_op_count_threshold` calls and the largest buffer handed to
/// any of them stayed below `small_buffer_threshold_bytes`. Large volume
/// alone is never penalized; only the buffering discipline is.
#[derive(Debug, Default, Clone, Copy)]
pub struct SmallBufferDetector;

impl Detector for SmallBufferDetector {
    fn kind(&self) -> DetectorKind {
        DetectorKind::SmallBuffer
    }

    fn detect(
        &mut self,
        env: &Env,
        info: &IoInfo,
        issues: &mut Vec<Issue>,
    ) -> Result<(), DetectError> {
        if info.op_count <= env.small_buffer_op_count_threshold {
            return Ok(());
        }
        if info.buffer_size_max >= env.small_buffer_threshold_bytes {
            return Ok(());
        }

        // op_count > threshold >= 0, so the division is safe
        let average_op_size = info.op_size_total / info.op_count;
        issues.push(Issue::new(info, IssueDetail::SmallBuffer { average_op_size }));
        Ok(())
    }
}
