//! Detector thresholds (`Env`)
//!
//! Every threshold has a default that works for an interactive application.
//! Values can be overridden one at a time through [`Env::set`] (the
//! `set_config` surface of the engine) or in bulk from a TOML file, where
//! missing keys keep their defaults.
//!
//! ```toml
//! repeat_read_threshold = 3
//! small_buffer_threshold_bytes = 8192
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Smallest repeat-read threshold that can ever be reached
pub const MIN_REPEAT_READ_THRESHOLD: u32 = 2;

/// Configuration read by detectors and by the collector
///
/// Immutable once the engine has started; shared with the analysis worker
/// behind an `Arc`.
///
/// # Example
/// ```
/// use ioprobe::config::{ConfigKey, Env};
///
/// let mut env = Env::default();
/// env.set(ConfigKey::RepeatReadThreshold, 3)?;
/// assert_eq!(env.repeat_read_threshold, 3);
/// # Ok::<(), ioprobe::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Env {
    /// Gap between consecutive read/write calls (µs) at or above which a
    /// continual run is broken.
    pub continual_threshold_us: u64,

    /// Cost (µs) below which a descriptor is assumed not worth reporting.
    /// Gates repeat-read tracking and grades main-thread issues.
    pub possible_negative_threshold_us: u64,

    /// Number of equivalent reads that makes a repeat-read issue.
    pub repeat_read_threshold: u32,

    /// Buffer size (bytes) below which a call counts as small.
    pub small_buffer_threshold_bytes: u64,

    /// Number of calls a descriptor must exceed before small buffers matter.
    pub small_buffer_op_count_threshold: u64,

    /// Continual block (µs) on the main thread graded as high severity.
    pub main_thread_threshold_us: u64,

    /// Thread id of the latency-sensitive thread. When unset the process id
    /// is used, which is the main thread's tid on Linux.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_thread_id: Option<i64>,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            continual_threshold_us: 8_000,
            possible_negative_threshold_us: 13_000,
            repeat_read_threshold: 5,
            small_buffer_threshold_bytes: 4_096,
            small_buffer_op_count_threshold: 20,
            main_thread_threshold_us: 500_000,
            main_thread_id: None,
        }
    }
}

/// Keys accepted by [`Env::set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    ContinualThreshold,
    PossibleNegativeThreshold,
    RepeatReadThreshold,
    SmallBufferThreshold,
    SmallBufferOpCountThreshold,
    MainThreadThreshold,
    MainThreadId,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::ContinualThreshold,
        ConfigKey::PossibleNegativeThreshold,
        ConfigKey::RepeatReadThreshold,
        ConfigKey::SmallBufferThreshold,
        ConfigKey::SmallBufferOpCountThreshold,
        ConfigKey::MainThreadThreshold,
        ConfigKey::MainThreadId,
    ];

    /// Field name as it appears in TOML
    pub fn name(self) -> &'static str {
        match self {
            ConfigKey::ContinualThreshold => "continual_threshold_us",
            ConfigKey::PossibleNegativeThreshold => "possible_negative_threshold_us",
            ConfigKey::RepeatReadThreshold => "repeat_read_threshold",
            ConfigKey::SmallBufferThreshold => "small_buffer_threshold_bytes",
            ConfigKey::SmallBufferOpCountThreshold => "small_buffer_op_count_threshold",
            ConfigKey::MainThreadThreshold => "main_thread_threshold_us",
            ConfigKey::MainThreadId => "main_thread_id",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }
}

impl Env {
    /// Load from a TOML file; keys not present keep their defaults.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let env: Env = toml::from_str(content)?;
        env.validate()?;
        Ok(env)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }

    /// Override a single value
    ///
    /// Negative values are rejected for every key, as is a zero continual
    /// threshold. The repeat-read threshold must be at least 2: the first
    /// read of a burst is its baseline and is never itself a repeat.
    pub fn set(&mut self, key: ConfigKey, value: i64) -> Result<()> {
        let invalid = |reason| Error::InvalidConfig {
            key: key.name(),
            value,
            reason,
        };

        let unsigned = u64::try_from(value).map_err(|_| invalid("must be non-negative"))?;

        match key {
            ConfigKey::ContinualThreshold => {
                if unsigned == 0 {
                    return Err(invalid("must be > 0"));
                }
                self.continual_threshold_us = unsigned;
            }
            ConfigKey::PossibleNegativeThreshold => self.possible_negative_threshold_us = unsigned,
            ConfigKey::RepeatReadThreshold => {
                let threshold = u32::try_from(unsigned).map_err(|_| invalid("out of range"))?;
                if threshold < MIN_REPEAT_READ_THRESHOLD {
                    return Err(invalid("must be >= 2"));
                }
                self.repeat_read_threshold = threshold;
            }
            ConfigKey::SmallBufferThreshold => self.small_buffer_threshold_bytes = unsigned,
            ConfigKey::SmallBufferOpCountThreshold => {
                self.small_buffer_op_count_threshold = unsigned
            }
            ConfigKey::MainThreadThreshold => self.main_thread_threshold_us = unsigned,
            ConfigKey::MainThreadId => {
                if unsigned == 0 {
                    return Err(invalid("must be a positive thread id"));
                }
                self.main_thread_id = Some(value);
            }
        }

        Ok(())
    }

    /// Validate values that did not come through [`Env::set`]
    pub fn validate(&self) -> Result<()> {
        if self.continual_threshold_us == 0 {
            return Err(Error::InvalidConfig {
                key: ConfigKey::ContinualThreshold.name(),
                value: 0,
                reason: "must be > 0",
            });
        }

        if self.repeat_read_threshold < MIN_REPEAT_READ_THRESHOLD {
            return Err(Error::InvalidConfig {
                key: ConfigKey::RepeatReadThreshold.name(),
                value: i64::from(self.repeat_read_threshold),
                reason: "must be >= 2",
            });
        }

        if let Some(id) = self.main_thread_id {
            if id <= 0 {
                return Err(Error::InvalidConfig {
                    key: ConfigKey::MainThreadId.name(),
                    value: id,
                    reason: "must be a positive thread id",
                });
            }
        }

        Ok(())
    }

    /// Thread id treated as the latency-sensitive thread
    pub fn main_thread_id(&self) -> i64 {
        self.main_thread_id
            .unwrap_or_else(|| i64::from(nix::unistd::getpid().as_raw()))
    }
}
