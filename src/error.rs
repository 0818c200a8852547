//! Error taxonomy for the anchor engine.
//!
//! Schema errors never leave restore; persistence and monotonicity errors
//! always reach the caller.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or unknown-schema line in the durable log.
    #[error("schema error at line {line}: {detail}")]
    Schema { line: usize, detail: String },

    /// Append or compaction I/O failed. In-memory state was rolled back.
    #[error("persistence failure for {}: {source}", .symbol.as_deref().unwrap_or("<store>"))]
    Persistence {
        symbol: Option<String>,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot timestamp went backwards for a symbol.
    #[error("monotonicity violation for {symbol}: incoming {incoming_timestamp_ms} < last {last_timestamp_ms}")]
    Monotonicity {
        symbol: String,
        last_timestamp_ms: i64,
        incoming_timestamp_ms: i64,
    },

    /// Belief distribution broke its sum/bounds invariant.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("symbol mismatch: expected {expected}, got {actual}")]
    SymbolMismatch { expected: String, actual: String },

    #[error("invalid config {field}={value}: {reason}")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    /// The coordinator stopped processing this symbol after a persistence failure.
    #[error("symbol {symbol} is halted after a persistence failure")]
    SymbolHalted { symbol: String },
}

impl EngineError {
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, EngineError::Persistence { .. })
    }

    pub fn is_monotonicity_violation(&self) -> bool {
        matches!(self, EngineError::Monotonicity { .. })
    }

    pub(crate) fn invalid_config(field: &str, value: impl ToString, reason: &str) -> Self {
        EngineError::InvalidConfig {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
