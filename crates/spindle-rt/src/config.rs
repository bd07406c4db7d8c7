// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Scheduler configuration.
//!
//! `from_env()` starts from the built-in defaults and applies `SPINDLE_*`
//! environment variables; setters called afterwards win over both.
//!
//! | Variable                     | Type    | Maps to              |
//! |------------------------------|---------|----------------------|
//! | `SPINDLE_DEFAULT_STACK_SIZE` | `usize` | `default_stack_size` |

use spindle_context::{DEFAULT_STACK_SIZE, MIN_STACK_SIZE};
use thiserror::Error;

pub const ENV_DEFAULT_STACK_SIZE: &str = "SPINDLE_DEFAULT_STACK_SIZE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: expected unsigned integer, got {value:?}")]
    Parse { var: &'static str, value: String },

    #[error("default stack size {0} is below the minimum of {min} bytes", min = MIN_STACK_SIZE)]
    StackTooSmall(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Stack size used when `create_with_stack` is given 0.
    pub default_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn default_stack_size(mut self, bytes: usize) -> Self {
        self.default_stack_size = bytes;
        self
    }

    /// Apply overrides from `lookup` (an environment-like source), then validate.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_DEFAULT_STACK_SIZE) {
            self.default_stack_size = parse_usize(ENV_DEFAULT_STACK_SIZE, &val)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::StackTooSmall(self.default_stack_size));
        }
        Ok(())
    }
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim().parse::<usize>().map_err(|_| ConfigError::Parse {
        var,
        value: val.to_string(),
    })
}
