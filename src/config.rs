//! Engine configuration, loaded from the environment with defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{EngineError, EngineResult};

/// Tuning for the belief-to-anchor hysteresis.
///
/// Supplied by the caller on every call; may differ across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HysteresisConfig {
    /// Consecutive gated updates required before a commit
    pub window_updates: u32,
    pub enter_threshold: f64,
    /// Minimum candidate mass at commit time
    pub commit_threshold: f64,
    /// Minimum candidate mass advantage over the anchor
    pub min_lead_over_anchor: f64,
    pub decay_factor: f64,
    pub min_confidence_floor: f64,
    /// Gaps strictly larger than this discard the previous state
    pub reset_max_gap_ms: i64,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            window_updates: 3,
            enter_threshold: 0.5,
            commit_threshold: 0.6,
            min_lead_over_anchor: 0.05,
            decay_factor: 0.5,
            min_confidence_floor: 0.0,
            reset_max_gap_ms: 15 * 60 * 1000,
        }
    }
}

impl HysteresisConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            window_updates: env_parse("HYST_WINDOW_UPDATES").unwrap_or(d.window_updates),
            enter_threshold: env_parse("HYST_ENTER_TH").unwrap_or(d.enter_threshold),
            commit_threshold: env_parse("HYST_COMMIT_TH").unwrap_or(d.commit_threshold),
            min_lead_over_anchor: env_parse("HYST_MIN_LEAD").unwrap_or(d.min_lead_over_anchor),
            decay_factor: env_parse("HYST_DECAY").unwrap_or(d.decay_factor),
            min_confidence_floor: env_parse("HYST_CONF_FLOOR").unwrap_or(d.min_confidence_floor),
            reset_max_gap_ms: env_parse("HYST_RESET_GAP_MS").unwrap_or(d.reset_max_gap_ms),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.window_updates < 1 {
            return Err(EngineError::invalid_config(
                "hysteresis.window_updates",
                self.window_updates,
                "must be >= 1",
            ));
        }
        for (field, value) in [
            ("hysteresis.enter_threshold", self.enter_threshold),
            ("hysteresis.commit_threshold", self.commit_threshold),
            ("hysteresis.min_lead_over_anchor", self.min_lead_over_anchor),
            ("hysteresis.decay_factor", self.decay_factor),
            ("hysteresis.min_confidence_floor", self.min_confidence_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::invalid_config(field, value, "must be between 0.0 and 1.0"));
            }
        }
        if self.reset_max_gap_ms < 0 {
            return Err(EngineError::invalid_config(
                "hysteresis.reset_max_gap_ms",
                self.reset_max_gap_ms,
                "must be >= 0",
            ));
        }
        Ok(())
    }
}

/// Where and how often the durable log is written.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Inline compaction every N appends across all symbols (0 disables)
    pub compact_every: u64,
}

impl StoreConfig {
    pub const DEFAULT_COMPACT_EVERY: u64 = 5000;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            compact_every: Self::DEFAULT_COMPACT_EVERY,
        }
    }

    pub fn from_env() -> Self {
        Self {
            path: std::env::var("HYST_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./hysteresis_store.jsonl")),
            compact_every: env_parse("HYST_COMPACT_EVERY").unwrap_or(Self::DEFAULT_COMPACT_EVERY),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.path.as_os_str().is_empty() {
            return Err(EngineError::invalid_config("store.path", "", "must not be empty"));
        }
        if self.path.file_name().is_none() {
            return Err(EngineError::invalid_config(
                "store.path",
                self.path.display(),
                "must name a file",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub hysteresis: HysteresisConfig,
    pub store: StoreConfig,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            hysteresis: HysteresisConfig::from_env(),
            store: StoreConfig::from_env(),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.hysteresis.validate()?;
        self.store.validate()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
