//! Pure hysteresis transition: (prev, belief, config) -> next.
//!
//! Turns a per-tick belief into a stable anchor regime. A challenger must
//! lead the anchor by `min_lead_over_anchor` for `window_updates` consecutive
//! updates and hold at least `commit_threshold` mass before it is promoted.
//!
//! ```text
//!  gap guard ─► cold start? ─► select candidate ─► same as anchor? ─► clear
//!                                    │
//!                                    ▼
//!                               lead gate ─fail─► hold prev
//!                                    │
//!                                    ▼
//!                         progress (reset | +1, clamped)
//!                                    │
//!                                    ▼
//!                     commit check ─► switch | blocked | accumulate
//! ```
//!
//! No clock, no randomness: equal inputs give byte-identical outputs.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::belief::{argmax, project, BeliefState};
use crate::config::HysteresisConfig;
use crate::error::{EngineError, EngineResult};
use crate::regime::Regime;

// =============================================================================
// Reason codes
// =============================================================================

pub const COLD_START: &str = "COLD_START";
pub const CANDIDATE_SAME_AS_ANCHOR: &str = "CANDIDATE_SAME_AS_ANCHOR";
pub const GATE_FAIL_MIN_LEAD: &str = "GATE_FAIL_MIN_LEAD";
pub const PROGRESS_RESET: &str = "PROGRESS_RESET";
pub const PROGRESS_ADVANCE: &str = "PROGRESS_ADVANCE";
pub const COMMIT_BLOCKED_THRESHOLD: &str = "COMMIT_BLOCKED_THRESHOLD";
pub const CANDIDATE_SELECTED_PREFIX: &str = "CANDIDATE_SELECTED:";
pub const COMMIT_SWITCH_PREFIX: &str = "COMMIT_SWITCH:";

pub fn candidate_selected(regime: Regime) -> String {
    format!("{}{}", CANDIDATE_SELECTED_PREFIX, regime)
}

pub fn commit_switch(from: Regime, to: Regime) -> String {
    format!("{}{}->{}", COMMIT_SWITCH_PREFIX, from, to)
}

// =============================================================================
// State
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HysteresisState {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub anchor_regime: Regime,
    pub candidate_regime: Option<Regime>,
    /// Always within `0..=progress_required`
    pub progress_current: u32,
    pub progress_required: u32,
    pub last_commit_timestamp_ms: Option<i64>,
    pub reason_codes: Vec<String>,
    pub debug: Option<BTreeMap<String, f64>>,
}

impl HysteresisState {
    /// A candidate is accumulating evidence.
    pub fn transition_active(&self) -> bool {
        self.progress_current > 0
    }

    pub fn committed(&self) -> bool {
        self.reason_codes
            .iter()
            .any(|c| c.starts_with(COMMIT_SWITCH_PREFIX))
    }

    /// The anchor was (re)established this call: a commit or a cold start.
    pub fn anchor_reset(&self) -> bool {
        self.committed() || self.reason_codes.iter().any(|c| c == COLD_START)
    }

    pub fn has_reason(&self, code: &str) -> bool {
        self.reason_codes.iter().any(|c| c == code)
    }

    /// SHA-256 over the canonical JSON form, for replay diffing and audit logs.
    ///
    /// Serialization cannot fail: every field is a string, an integer, a
    /// regime, or a string-keyed map of floats (non-finite floats encode as
    /// `null`).
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

/// True when the transition changed anything worth persisting.
///
/// A timestamp-only change is not material.
pub fn materially_advanced(prev: Option<&HysteresisState>, next: &HysteresisState) -> bool {
    match prev {
        None => true,
        Some(p) => {
            p.anchor_regime != next.anchor_regime
                || p.candidate_regime != next.candidate_regime
                || p.progress_current != next.progress_current
        }
    }
}

/// Argmax of the belief. Ties go to the earliest declared regime; the hint
/// is ignored.
pub fn select_candidate(belief: &BeliefState, _previous_candidate: Option<Regime>) -> Regime {
    argmax(belief)
}

// =============================================================================
// Transition
// =============================================================================

/// Advance the hysteresis by one belief update.
///
/// Only fails when `prev` belongs to a different symbol than `belief`.
pub fn advance(
    prev: Option<&HysteresisState>,
    belief: &BeliefState,
    cfg: &HysteresisConfig,
) -> EngineResult<HysteresisState> {
    if let Some(p) = prev {
        if p.symbol != belief.symbol {
            return Err(EngineError::SymbolMismatch {
                expected: p.symbol.clone(),
                actual: belief.symbol.clone(),
            });
        }
    }

    let window = cfg.window_updates;
    // Gap guard: strictly greater than the limit discards prev.
    let prev = prev.filter(|p| {
        belief.timestamp_ms.saturating_sub(p.timestamp_ms) <= cfg.reset_max_gap_ms
    });

    let mut reasons = Vec::new();
    let (anchor, prev_candidate, prev_progress, last_commit) = match prev {
        Some(p) => (
            p.anchor_regime,
            p.candidate_regime,
            p.progress_current.min(window),
            p.last_commit_timestamp_ms,
        ),
        None => {
            reasons.push(COLD_START.to_string());
            (project(belief), None, 0, None)
        }
    };

    let mut next = HysteresisState {
        symbol: belief.symbol.clone(),
        timestamp_ms: belief.timestamp_ms,
        anchor_regime: anchor,
        candidate_regime: prev_candidate,
        progress_current: prev_progress,
        progress_required: window,
        last_commit_timestamp_ms: last_commit,
        reason_codes: Vec::new(),
        debug: None,
    };

    let candidate = select_candidate(belief, prev_candidate);
    if candidate == anchor {
        next.candidate_regime = None;
        next.progress_current = 0;
        reasons.push(CANDIDATE_SAME_AS_ANCHOR.to_string());
        next.reason_codes = reasons;
        return Ok(next);
    }

    let candidate_mass = belief.mass(candidate);
    let anchor_mass = belief.mass(anchor);
    let lead = candidate_mass - anchor_mass;
    let mut debug = BTreeMap::new();
    debug.insert("anchor_mass".to_string(), anchor_mass);
    debug.insert("candidate_mass".to_string(), candidate_mass);
    debug.insert("lead".to_string(), lead);
    next.debug = Some(debug);

    if lead < cfg.min_lead_over_anchor {
        reasons.push(GATE_FAIL_MIN_LEAD.to_string());
        next.reason_codes = reasons;
        return Ok(next);
    }

    if prev_candidate != Some(candidate) {
        next.candidate_regime = Some(candidate);
        next.progress_current = 1.min(window);
        reasons.push(candidate_selected(candidate));
        reasons.push(PROGRESS_RESET.to_string());
    } else {
        next.progress_current = prev_progress.saturating_add(1).min(window);
        reasons.push(PROGRESS_ADVANCE.to_string());
    }

    if next.progress_current >= window {
        if candidate_mass >= cfg.commit_threshold {
            next.anchor_regime = candidate;
            next.candidate_regime = None;
            next.progress_current = 0;
            next.last_commit_timestamp_ms = Some(belief.timestamp_ms);
            reasons.push(commit_switch(anchor, candidate));
        } else {
            // Hold at the window until the candidate is strong enough.
            reasons.push(COMMIT_BLOCKED_THRESHOLD.to_string());
        }
    }

    next.reason_codes = reasons;
    Ok(next)
}
