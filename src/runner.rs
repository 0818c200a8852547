//! Coordinator: evidence -> belief -> hysteresis -> durable store.
//!
//! One call per (symbol, timestamp). Calls for different symbols may run
//! concurrently; the store serializes their appends. Within a symbol,
//! timestamps must not go backwards.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::belief::{self, BeliefState, EvidenceBatch};
use crate::config::{EngineConfig, HysteresisConfig};
use crate::error::{EngineError, EngineResult};
use crate::hysteresis::{advance, HysteresisState, COLD_START, GATE_FAIL_MIN_LEAD};
use crate::logging::{obj, v_int, v_num, v_str, Domain, Logger};
use crate::reliability::halt::HaltRegistry;
use crate::reliability::store::{RestoreReport, StateStore};

/// Emitted for every successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePublished {
    pub symbol: String,
    pub timestamp_ms: i64,
    pub state: HysteresisState,
    /// A durable record was written for this call
    pub appended: bool,
    pub digest: String,
}

impl StatePublished {
    pub fn transition_active(&self) -> bool {
        self.state.transition_active()
    }

    /// The anchor was committed or re-established this call.
    pub fn anchor_changed(&self) -> bool {
        self.state.anchor_reset()
    }
}

#[derive(Debug)]
pub struct EngineRunner {
    config: HysteresisConfig,
    store: StateStore,
    beliefs: Mutex<BTreeMap<String, BeliefState>>,
    halts: Mutex<HaltRegistry>,
    logger: Arc<Logger>,
}

impl EngineRunner {
    /// Validate `config`, restore the store and return a ready runner.
    pub fn open(config: &EngineConfig, logger: Arc<Logger>) -> EngineResult<(Self, RestoreReport)> {
        config.validate()?;
        let (store, report) = StateStore::open(&config.store, &config.hysteresis, logger.clone())?;
        logger.info(
            Domain::System,
            "runner.started",
            obj(&[
                ("symbols", v_int(report.symbols as i64)),
                ("window_updates", v_int(config.hysteresis.window_updates as i64)),
            ]),
        );
        let runner = Self {
            config: config.hysteresis.clone(),
            store,
            beliefs: Mutex::new(BTreeMap::new()),
            halts: Mutex::new(HaltRegistry::new()),
            logger,
        };
        Ok((runner, report))
    }

    pub fn config(&self) -> &HysteresisConfig {
        &self.config
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Fold `batch` into the symbol's belief and advance its hysteresis.
    pub fn process(&self, batch: &EvidenceBatch) -> EngineResult<StatePublished> {
        self.check_admissible(&batch.symbol, batch.timestamp_ms)?;

        let prev_belief = self
            .beliefs()
            .get(&batch.symbol)
            .cloned()
            .unwrap_or_else(|| self.seed_belief(&batch.symbol, batch.timestamp_ms));
        let next_belief = belief::update(&prev_belief, batch)?;
        if let Some(winner) = batch.winner() {
            self.logger.debug(
                Domain::Belief,
                "belief.winner",
                obj(&[
                    ("symbol", v_str(&batch.symbol)),
                    ("regime", v_str(winner.regime.as_str())),
                    ("source", v_str(&winner.source)),
                    ("opinions", v_int(batch.opinions.len() as i64)),
                ]),
            );
        }
        self.drive(next_belief)
    }

    /// Advance the hysteresis from a belief produced upstream.
    pub fn process_belief(&self, belief: BeliefState) -> EngineResult<StatePublished> {
        self.check_admissible(&belief.symbol, belief.timestamp_ms)?;
        belief::validate(&belief)?;
        self.drive(belief)
    }

    fn check_admissible(&self, symbol: &str, timestamp_ms: i64) -> EngineResult<()> {
        if !self.halts().allow(symbol) {
            return Err(EngineError::SymbolHalted {
                symbol: symbol.to_string(),
            });
        }
        if let Some(last) = self.store.last_timestamp(symbol) {
            if timestamp_ms < last {
                self.logger.warn(
                    Domain::Runner,
                    "runner.monotonicity_violation",
                    obj(&[
                        ("symbol", v_str(symbol)),
                        ("last_timestamp_ms", v_int(last)),
                        ("incoming_timestamp_ms", v_int(timestamp_ms)),
                    ]),
                );
                return Err(EngineError::Monotonicity {
                    symbol: symbol.to_string(),
                    last_timestamp_ms: last,
                    incoming_timestamp_ms: timestamp_ms,
                });
            }
        }
        Ok(())
    }

    /// First belief for a symbol; a restored symbol keeps its anchor.
    fn seed_belief(&self, symbol: &str, timestamp_ms: i64) -> BeliefState {
        let mut seed = belief::initialize(symbol, timestamp_ms);
        if let Some(state) = self.store.get(symbol) {
            seed.anchor_regime = state.anchor_regime;
        }
        seed
    }

    fn drive(&self, mut belief: BeliefState) -> EngineResult<StatePublished> {
        let symbol = belief.symbol.clone();
        let prev = self.store.get(&symbol);
        let next = advance(prev.as_ref(), &belief, &self.config)?;

        if prev.is_some() && next.has_reason(COLD_START) {
            self.logger.info(
                Domain::Hysteresis,
                "runner.gap_reset",
                obj(&[
                    ("symbol", v_str(&symbol)),
                    ("timestamp_ms", v_int(next.timestamp_ms)),
                    ("reset_max_gap_ms", v_int(self.config.reset_max_gap_ms)),
                ]),
            );
        }

        let appended = match self.store.commit(next.clone()) {
            Ok(appended) => appended,
            Err(err) => {
                if err.is_persistence_failure() {
                    // A failed inline compaction leaves `next` installed.
                    if self.store.get(&symbol).as_ref() == Some(&next) {
                        belief.anchor_regime = next.anchor_regime;
                        self.beliefs().insert(symbol.clone(), belief.clone());
                    }
                    self.halts().trip(&symbol, err.to_string(), belief.timestamp_ms);
                    self.logger.error(
                        Domain::Runner,
                        "runner.halt",
                        obj(&[("symbol", v_str(&symbol)), ("msg", v_str(&err.to_string()))]),
                    );
                }
                return Err(err);
            }
        };

        belief.anchor_regime = next.anchor_regime;
        self.beliefs().insert(symbol.clone(), belief);

        self.log_transition(&next);
        let digest = next.digest();
        self.logger.debug(
            Domain::Audit,
            "audit.published",
            obj(&[
                ("symbol", v_str(&symbol)),
                ("state_hash", v_str(&digest)),
                ("appended", serde_json::Value::Bool(appended)),
            ]),
        );

        Ok(StatePublished {
            symbol,
            timestamp_ms: next.timestamp_ms,
            state: next,
            appended,
            digest,
        })
    }

    fn log_transition(&self, state: &HysteresisState) {
        if state.committed() {
            self.logger.info(
                Domain::Hysteresis,
                "runner.commit",
                obj(&[
                    ("symbol", v_str(&state.symbol)),
                    ("anchor_regime", v_str(state.anchor_regime.as_str())),
                    ("timestamp_ms", v_int(state.timestamp_ms)),
                ]),
            );
        } else if state.has_reason(GATE_FAIL_MIN_LEAD) {
            let lead = state.debug.as_ref().and_then(|d| d.get("lead")).copied();
            self.logger.debug(
                Domain::Hysteresis,
                "runner.gate_fail",
                obj(&[
                    ("symbol", v_str(&state.symbol)),
                    ("lead", lead.map_or(serde_json::Value::Null, v_num)),
                    ("min_lead_over_anchor", v_num(self.config.min_lead_over_anchor)),
                ]),
            );
        }
    }

    pub fn state(&self, symbol: &str) -> Option<HysteresisState> {
        self.store.get(symbol)
    }

    pub fn belief(&self, symbol: &str) -> Option<BeliefState> {
        self.beliefs().get(symbol).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, HysteresisState> {
        self.store.snapshot()
    }

    pub fn compact(&self) -> EngineResult<()> {
        self.store.compact()
    }

    pub fn halted_symbols(&self) -> Vec<String> {
        self.halts().halted_symbols()
    }

    /// Clear a fail-stop. Returns false if the symbol was not halted.
    pub fn resume(&self, symbol: &str) -> bool {
        let cleared = self.halts().resume(symbol);
        if let Some(rec) = &cleared {
            self.logger.info(
                Domain::Runner,
                "runner.resume",
                obj(&[("symbol", v_str(symbol)), ("msg", v_str(&rec.reason))]),
            );
        }
        cleared.is_some()
    }

    fn beliefs(&self) -> MutexGuard<'_, BTreeMap<String, BeliefState>> {
        self.beliefs.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn halts(&self) -> MutexGuard<'_, HaltRegistry> {
        self.halts.lock().unwrap_or_else(|p| p.into_inner())
    }
}
