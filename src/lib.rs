//! ioprobe - in-process file I/O diagnostics
//!
//! Hooks report `open`/`read`/`write`/`close` calls to an [`Engine`]. The
//! engine aggregates them per descriptor and, once a descriptor is closed,
//! hands the finalized record to a background worker that runs the
//! registered detectors and publishes any issues they find.

pub mod call_site;
pub mod cli;
pub mod clock;
pub mod collector;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod event;
pub mod io_info;
pub mod issue;
pub mod queue;
pub mod report;

pub use call_site::CallSite;
pub use config::{ConfigKey, Env};
pub use detector::DetectorKind;
pub use engine::{Engine, EngineStats};
pub use error::{Error, Result};
pub use issue::{Issue, IssueKind, Severity};
