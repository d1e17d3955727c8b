//! Detector framework
//!
//! A detector inspects one finalized [`IoInfo`] at a time and appends zero
//! or more issues. Detectors run only on the analysis worker, in
//! registration order, so they may keep state without synchronization.
//!
//! A failing detector never takes the others down: [`DetectorSet::run`]
//! contains both error returns and panics to the detector that produced
//! them, discards its partial output for that record, and resets it.

mod main_thread;
mod repeat_read;
mod small_buffer;

pub use main_thread::MainThreadDetector;
pub use repeat_read::{RepeatReadDetector, RepeatReadInfo, REPEAT_READ_WINDOW_MS};
pub use small_buffer::SmallBufferDetector;

use crate::clock::Clock;
use crate::config::Env;
use crate::io_info::IoInfo;
use crate::issue::Issue;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Failure local to one detector and one record
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectError {
    #[error("Malformed record: {0}")]
    MalformedRecord(&'static str),

    #[error("Detector panicked: {0}")]
    Panicked(String),
}

/// The detection capability
pub trait Detector: Send {
    fn kind(&self) -> DetectorKind;

    /// Inspect one finalized record
    fn detect(
        &mut self,
        env: &Env,
        info: &IoInfo,
        issues: &mut Vec<Issue>,
    ) -> Result<(), DetectError>;

    /// Drop any state accumulated across records
    fn reset(&mut self) {}
}

/// Closed set of detector variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    MainThread,
    SmallBuffer,
    RepeatRead,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 3] = [
        DetectorKind::MainThread,
        DetectorKind::SmallBuffer,
        DetectorKind::RepeatRead,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DetectorKind::MainThread => "main-thread",
            DetectorKind::SmallBuffer => "small-buffer",
            DetectorKind::RepeatRead => "repeat-read",
        }
    }

    /// Build a fresh detector of this kind
    pub fn build(self, clock: Arc<dyn Clock>) -> Box<dyn Detector> {
        match self {
            DetectorKind::MainThread => Box::new(MainThreadDetector),
            DetectorKind::SmallBuffer => Box::new(SmallBufferDetector),
            DetectorKind::RepeatRead => Box::new(RepeatReadDetector::new(clock)),
        }
    }
}

/// Registered detectors, in evaluation order
#[derive(Default)]
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
}

impl std::fmt::Debug for DetectorSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.detectors.iter().map(|d| d.kind().name()))
            .finish()
    }
}

/// Issues from one record plus the number of detectors that failed on it
#[derive(Debug, Default)]
pub struct DetectionOutcome {
    pub issues: Vec<Issue>,
    pub failures: usize,
}

impl DetectorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a detector. A kind that is already registered is ignored,
    /// since running it twice would only duplicate its issues.
    pub fn register(&mut self, detector: Box<dyn Detector>) -> bool {
        let kind = detector.kind();
        if self.contains(kind) {
            warn!(detector = kind.name(), "detector already registered; ignoring");
            return false;
        }
        self.detectors.push(detector);
        true
    }

    pub fn contains(&self, kind: DetectorKind) -> bool {
        self.detectors.iter().any(|d| d.kind() == kind)
    }

    pub fn kinds(&self) -> Vec<DetectorKind> {
        self.detectors.iter().map(|d| d.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    /// Run every detector against one record and pool their issues
    pub fn run(&mut self, env: &Env, info: &IoInfo) -> DetectionOutcome {
        let mut outcome = DetectionOutcome::default();

        for detector in &mut self.detectors {
            let mut local = Vec::new();
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| detector.detect(env, info, &mut local)))
                    .unwrap_or_else(|payload| {
                        Err(DetectError::Panicked(panic_message(payload.as_ref())))
                    });

            match result {
                Ok(()) => outcome.issues.append(&mut local),
                Err(e) => {
                    warn!(
                        detector = detector.kind().name(),
                        path = %info.path,
                        error = %e,
                        "detector failed; its output for this record is discarded"
                    );
                    detector.reset();
                    outcome.failures += 1;
                }
            }
        }

        outcome
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests;
