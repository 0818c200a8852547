//! Belief update: collapse weighted regime opinions into a distribution.
//!
//! The update is strict winner-take-all. The strongest opinion (then the most
//! confident, then the earliest declared regime) receives the full mass.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};
use crate::regime::Regime;

/// Tolerance for the sum-to-one invariant.
pub const BELIEF_EPSILON: f64 = 1e-9;

/// One pluggable opinion about the current regime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceOpinion {
    pub regime: Regime,
    /// Signal strength in [0, 1]
    pub strength: f64,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub source: String,
}

impl EvidenceOpinion {
    pub fn new(regime: Regime, strength: f64, confidence: f64, source: impl Into<String>) -> Self {
        Self {
            regime,
            strength,
            confidence,
            source: source.into(),
        }
    }

    /// Wrap a finished upstream regime estimate as a full-strength opinion.
    pub fn from_estimate(regime: Regime, confidence: f64, source: impl Into<String>) -> Self {
        Self::new(regime, 1.0, confidence, source)
    }

    fn rank_cmp(&self, other: &Self) -> Ordering {
        unit(other.strength)
            .total_cmp(&unit(self.strength))
            .then_with(|| unit(other.confidence).total_cmp(&unit(self.confidence)))
            .then_with(|| self.regime.cmp(&other.regime))
    }
}

/// Out-of-range inputs rank as their nearest bound; NaN ranks as zero.
fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// All opinions for one symbol at one timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBatch {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub opinions: Vec<EvidenceOpinion>,
}

impl EvidenceBatch {
    pub fn new(symbol: impl Into<String>, timestamp_ms: i64, opinions: Vec<EvidenceOpinion>) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp_ms,
            opinions,
        }
    }

    /// The opinion that wins the belief update, if any.
    pub fn winner(&self) -> Option<&EvidenceOpinion> {
        self.opinions.iter().min_by(|a, b| a.rank_cmp(b))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeliefState {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub belief_by_regime: BTreeMap<Regime, f64>,
    pub anchor_regime: Regime,
}

impl BeliefState {
    /// Build a belief from explicit masses. Regimes not listed get zero mass.
    pub fn from_masses(
        symbol: impl Into<String>,
        timestamp_ms: i64,
        masses: &[(Regime, f64)],
        anchor_regime: Regime,
    ) -> EngineResult<Self> {
        let mut belief_by_regime: BTreeMap<Regime, f64> =
            Regime::ALL.iter().map(|r| (*r, 0.0)).collect();
        for (regime, mass) in masses {
            belief_by_regime.insert(*regime, *mass);
        }
        let state = Self {
            symbol: symbol.into(),
            timestamp_ms,
            belief_by_regime,
            anchor_regime,
        };
        validate(&state)?;
        Ok(state)
    }

    pub fn mass(&self, regime: Regime) -> f64 {
        self.belief_by_regime.get(&regime).copied().unwrap_or(0.0)
    }
}

/// Uniform belief over every regime, anchored on the first declared one.
pub fn initialize(symbol: &str, timestamp_ms: i64) -> BeliefState {
    let mass = 1.0 / Regime::COUNT as f64;
    BeliefState {
        symbol: symbol.to_string(),
        timestamp_ms,
        belief_by_regime: Regime::ALL.iter().map(|r| (*r, mass)).collect(),
        anchor_regime: Regime::first(),
    }
}

/// Fold a batch of opinions into the previous belief.
///
/// Always returns a freshly owned map; `prev` is never aliased.
pub fn update(prev: &BeliefState, evidence: &EvidenceBatch) -> EngineResult<BeliefState> {
    if evidence.symbol != prev.symbol {
        return Err(EngineError::SymbolMismatch {
            expected: prev.symbol.clone(),
            actual: evidence.symbol.clone(),
        });
    }

    let belief_by_regime = match evidence.winner() {
        Some(winner) => Regime::ALL
            .iter()
            .map(|r| (*r, if *r == winner.regime { 1.0 } else { 0.0 }))
            .collect(),
        None => prev.belief_by_regime.clone(),
    };

    let next = BeliefState {
        symbol: prev.symbol.clone(),
        timestamp_ms: evidence.timestamp_ms,
        belief_by_regime,
        anchor_regime: prev.anchor_regime,
    };
    validate(&next)?;
    Ok(next)
}

/// Argmax of the belief, ties going to the earliest declared regime.
pub fn project(state: &BeliefState) -> Regime {
    argmax(state)
}

pub(crate) fn argmax(state: &BeliefState) -> Regime {
    let mut best = Regime::first();
    let mut best_mass = state.mass(best);
    for regime in Regime::ALL.iter().skip(1) {
        let mass = state.mass(*regime);
        if mass > best_mass {
            best = *regime;
            best_mass = mass;
        }
    }
    best
}

/// Check that masses are finite, non-negative and sum to one.
pub fn validate(state: &BeliefState) -> EngineResult<()> {
    let mut sum = 0.0;
    for (regime, mass) in &state.belief_by_regime {
        if !mass.is_finite() || *mass < 0.0 {
            return Err(EngineError::Validation(format!(
                "{}: mass for {} is {}",
                state.symbol, regime, mass
            )));
        }
        sum += mass;
    }
    if (sum - 1.0).abs() > BELIEF_EPSILON {
        return Err(EngineError::Validation(format!(
            "{}: belief sums to {}",
            state.symbol, sum
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(opinions: Vec<EvidenceOpinion>) -> EvidenceBatch {
        EvidenceBatch::new("BTCUSDT", 2_000, opinions)
    }

    #[test]
    fn test_initialize_is_uniform() {
        let b = initialize("BTCUSDT", 1_000);
        assert_eq!(b.belief_by_regime.len(), Regime::COUNT);
        for r in Regime::ALL {
            assert!((b.mass(r) - 1.0 / 9.0).abs() < 1e-12);
        }
        assert_eq!(b.anchor_regime, Regime::ChopBalanced);
        assert!(validate(&b).is_ok());
        // Uniform ties resolve to the first declared regime.
        assert_eq!(project(&b), Regime::ChopBalanced);
    }

    #[test]
    fn test_strongest_opinion_takes_all_mass() {
        let prev = initialize("BTCUSDT", 1_000);
        let next = update(
            &prev,
            &batch(vec![
                EvidenceOpinion::new(Regime::TrendBuildUp, 0.4, 0.9, "trend"),
                EvidenceOpinion::new(Regime::SqueezeUp, 0.8, 0.2, "squeeze"),
            ]),
        )
        .unwrap();
        assert_eq!(next.mass(Regime::SqueezeUp), 1.0);
        assert_eq!(next.mass(Regime::TrendBuildUp), 0.0);
        assert_eq!(next.timestamp_ms, 2_000);
        assert_eq!(project(&next), Regime::SqueezeUp);
    }

    #[test]
    fn test_confidence_then_declaration_order_break_ties() {
        let prev = initialize("BTCUSDT", 1_000);
        let by_conf = update(
            &prev,
            &batch(vec![
                EvidenceOpinion::new(Regime::LiquidationUp, 0.7, 0.5, "a"),
                EvidenceOpinion::new(Regime::LiquidationDown, 0.7, 0.6, "b"),
            ]),
        )
        .unwrap();
        assert_eq!(project(&by_conf), Regime::LiquidationDown);

        let by_order = update(
            &prev,
            &batch(vec![
                EvidenceOpinion::new(Regime::TrendExhaustion, 0.7, 0.6, "a"),
                EvidenceOpinion::new(Regime::ChopStophunt, 0.7, 0.6, "b"),
            ]),
        )
        .unwrap();
        assert_eq!(project(&by_order), Regime::ChopStophunt);
    }

    #[test]
    fn test_empty_evidence_only_advances_timestamp() {
        let prev = BeliefState::from_masses(
            "BTCUSDT",
            1_000,
            &[(Regime::SqueezeDown, 0.25), (Regime::ChopBalanced, 0.75)],
            Regime::ChopBalanced,
        )
        .unwrap();
        let next = update(&prev, &batch(vec![])).unwrap();
        assert_eq!(next.belief_by_regime, prev.belief_by_regime);
        assert_eq!(next.timestamp_ms, 2_000);
    }

    #[test]
    fn test_symbol_mismatch_rejected() {
        let prev = initialize("ETHUSDT", 1_000);
        let err = update(&prev, &batch(vec![])).unwrap_err();
        assert!(matches!(err, EngineError::SymbolMismatch { .. }));
    }

    #[test]
    fn test_update_does_not_alias_previous_map() {
        let prev = initialize("BTCUSDT", 1_000);
        let mut next = update(&prev, &batch(vec![])).unwrap();
        next.belief_by_regime.insert(Regime::SqueezeUp, 0.9);
        assert!((prev.mass(Regime::SqueezeUp) - 1.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_bad_distributions() {
        assert!(BeliefState::from_masses("X", 0, &[(Regime::SqueezeUp, 0.5)], Regime::ChopBalanced).is_err());
        assert!(BeliefState::from_masses(
            "X",
            0,
            &[(Regime::SqueezeUp, 1.5), (Regime::SqueezeDown, -0.5)],
            Regime::ChopBalanced
        )
        .is_err());
        assert!(BeliefState::from_masses("X", 0, &[(Regime::SqueezeUp, f64::NAN)], Regime::ChopBalanced).is_err());
    }

    #[test]
    fn test_nan_strength_ranks_last() {
        let prev = initialize("BTCUSDT", 1_000);
        let next = update(
            &prev,
            &batch(vec![
                EvidenceOpinion::new(Regime::ChopBalanced, f64::NAN, 1.0, "broken"),
                EvidenceOpinion::new(Regime::TrendBuildDown, 0.1, 0.1, "weak"),
            ]),
        )
        .unwrap();
        assert_eq!(project(&next), Regime::TrendBuildDown);
    }
}
