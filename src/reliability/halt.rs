//! Per-symbol fail-stop registry.
//!
//! A symbol trips after a persistence failure: memory and disk may disagree
//! (partial bytes can exist), so the coordinator refuses it until an operator
//! resumes it.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaltRecord {
    pub reason: String,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct HaltRegistry {
    halted: BTreeMap<String, HaltRecord>,
}

impl HaltRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip(&mut self, symbol: &str, reason: String, timestamp_ms: i64) {
        self.halted
            .entry(symbol.to_string())
            .or_insert(HaltRecord { reason, timestamp_ms });
    }

    /// Returns the halt record that was cleared, if any.
    pub fn resume(&mut self, symbol: &str) -> Option<HaltRecord> {
        self.halted.remove(symbol)
    }

    pub fn allow(&self, symbol: &str) -> bool {
        !self.halted.contains_key(symbol)
    }

    pub fn get(&self, symbol: &str) -> Option<&HaltRecord> {
        self.halted.get(symbol)
    }

    pub fn halted_symbols(&self) -> Vec<String> {
        self.halted.keys().cloned().collect()
    }
}
