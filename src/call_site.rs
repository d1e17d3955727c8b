//! Call-site identity attached to every tracked descriptor
//!
//! The engine treats a [`CallSite`] as opaque: it is captured by whoever
//! delivers the `open` event and only compared or reported afterwards.
//! [`CallSite::capture`] is a convenience for hosts that have no richer
//! notion of "where" than the native thread and its symbolic stack.

use serde::{Deserialize, Serialize};

/// Maximum frames kept by [`CallSite::capture`]
const MAX_CAPTURED_FRAMES: usize = 32;

/// Thread and stack that opened a descriptor
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    pub thread_id: i64,
    #[serde(default)]
    pub thread_name: String,
    #[serde(default)]
    pub stack: String,
}

impl CallSite {
    pub fn new(thread_id: i64, thread_name: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            thread_id,
            thread_name: thread_name.into(),
            stack: stack.into(),
        }
    }

    /// Capture the calling thread's id, name and symbolic stack
    ///
    /// Symbolication is expensive; call it once per `open`, never per read.
    pub fn capture() -> Self {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or_default().to_string();

        Self {
            thread_id: current_thread_id(),
            thread_name,
            stack: capture_stack(),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn current_thread_id() -> i64 {
    i64::from(nix::unistd::gettid().as_raw())
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn current_thread_id() -> i64 {
    i64::from(nix::unistd::getpid().as_raw())
}

/// One `function (file:line)` line per resolved frame
fn capture_stack() -> String {
    let backtrace = backtrace::Backtrace::new();
    let mut lines = Vec::with_capacity(MAX_CAPTURED_FRAMES);

    for frame in backtrace.frames() {
        for symbol in frame.symbols() {
            let Some(name) = symbol.name() else {
                continue;
            };
            let line = match (symbol.filename(), symbol.lineno()) {
                (Some(file), Some(lineno)) => format!("{} ({}:{})", name, file.display(), lineno),
                _ => name.to_string(),
            };
            lines.push(line);
        }
        if lines.len() >= MAX_CAPTURED_FRAMES {
            break;
        }
    }

    lines.truncate(MAX_CAPTURED_FRAMES);
    lines.join("\n")
}
