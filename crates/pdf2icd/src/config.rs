use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_FUZZY_LIMIT: usize = 3;
pub const DEFAULT_FUZZY_THRESHOLD: u8 = 85;
pub const MAX_FUZZY_THRESHOLD: u8 = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("fuzzy_limit must be >= 1, got {0}")]
    FuzzyLimit(usize),
    #[error("fuzzy_threshold must be between 0 and 100, got {0}")]
    FuzzyThreshold(u32),
    #[error("triage option {name} must be {expected}, got {value}")]
    Triage {
        name: &'static str,
        expected: &'static str,
        value: f64,
    },
}

/// Options controlling the exact → fuzzy fallback.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct MatchConfig {
    /// Maximum fuzzy candidate terms kept per mention.
    pub fuzzy_limit: usize,
    /// Minimum similarity score (0-100) a fuzzy candidate needs.
    pub fuzzy_threshold: u8,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            fuzzy_limit: DEFAULT_FUZZY_LIMIT,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
        }
    }
}

impl MatchConfig {
    pub fn new(fuzzy_limit: usize, fuzzy_threshold: u32) -> Result<Self, ConfigError> {
        if fuzzy_limit == 0 {
            return Err(ConfigError::FuzzyLimit(fuzzy_limit));
        }
        if fuzzy_threshold > u32::from(MAX_FUZZY_THRESHOLD) {
            return Err(ConfigError::FuzzyThreshold(fuzzy_threshold));
        }
        Ok(Self {
            fuzzy_limit,
            fuzzy_threshold: fuzzy_threshold as u8,
        })
    }

    /// Apply optional per-request overrides on top of `self`.
    pub fn with_overrides(
        self,
        fuzzy_limit: Option<usize>,
        fuzzy_threshold: Option<u32>,
    ) -> Result<Self, ConfigError> {
        Self::new(
            fuzzy_limit.unwrap_or(self.fuzzy_limit),
            fuzzy_threshold.unwrap_or(u32::from(self.fuzzy_threshold)),
        )
    }
}
