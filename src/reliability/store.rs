//! Durable per-symbol hysteresis store.
//!
//! In-memory map of live states backed by an NDJSON append log. Only
//! materially advanced states are appended; every `compact_every` appends
//! the log is rewritten to one record per symbol. All log I/O runs under a
//! single mutex so records from different symbols never interleave.
//!
//! Restore scans the whole log, skips lines that fail to parse, and keeps the
//! record with the greatest timestamp per symbol (later line wins ties).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{HysteresisConfig, StoreConfig};
use crate::error::{EngineError, EngineResult};
use crate::fault::inject::FaultProfile;
use crate::hysteresis::{materially_advanced, HysteresisState};
use crate::logging::{obj, v_int, v_str, Domain, Logger};
use crate::regime::Regime;
use crate::reliability::wal::Wal;

pub const RECORD_SCHEMA: &str = "hysteresis_store_record";
pub const RECORD_SCHEMA_VERSION: &str = "1";

// =============================================================================
// Persisted record
// =============================================================================

/// Durable projection of a [`HysteresisState`].
///
/// `progress_required`, `reason_codes` and `debug` are not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub schema: String,
    pub schema_version: String,
    pub symbol: String,
    pub engine_timestamp_ms: i64,
    pub anchor_regime: Regime,
    pub candidate_regime: Option<Regime>,
    pub progress_current: u32,
    pub last_commit_timestamp_ms: Option<i64>,
}

impl PersistedRecord {
    pub fn from_state(state: &HysteresisState) -> Self {
        Self {
            schema: RECORD_SCHEMA.to_string(),
            schema_version: RECORD_SCHEMA_VERSION.to_string(),
            symbol: state.symbol.clone(),
            engine_timestamp_ms: state.timestamp_ms,
            anchor_regime: state.anchor_regime,
            candidate_regime: state.candidate_regime,
            progress_current: state.progress_current,
            last_commit_timestamp_ms: state.last_commit_timestamp_ms,
        }
    }

    /// Rebuild a live state. `progress_required` comes from `cfg`, not the log.
    pub fn to_state(&self, cfg: &HysteresisConfig) -> HysteresisState {
        HysteresisState {
            symbol: self.symbol.clone(),
            timestamp_ms: self.engine_timestamp_ms,
            anchor_regime: self.anchor_regime,
            candidate_regime: self.candidate_regime,
            progress_current: self.progress_current,
            progress_required: cfg.window_updates,
            last_commit_timestamp_ms: self.last_commit_timestamp_ms,
            reason_codes: Vec::new(),
            debug: None,
        }
    }

    pub fn to_line(&self) -> EngineResult<String> {
        serde_json::to_string(self).map_err(|e| EngineError::Persistence {
            symbol: Some(self.symbol.clone()),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }

    /// Parse and schema-check one log line. `line` is 1-based, for reporting.
    pub fn parse(bytes: &[u8], line: usize) -> EngineResult<Self> {
        let schema_err = |detail: String| EngineError::Schema { line, detail };
        let rec: PersistedRecord =
            serde_json::from_slice(bytes).map_err(|e| schema_err(e.to_string()))?;
        if rec.schema != RECORD_SCHEMA {
            return Err(schema_err(format!("unknown schema {:?}", rec.schema)));
        }
        if rec.schema_version != RECORD_SCHEMA_VERSION {
            return Err(schema_err(format!(
                "unsupported schema_version {:?}",
                rec.schema_version
            )));
        }
        if rec.symbol.is_empty() {
            return Err(schema_err("empty symbol".to_string()));
        }
        Ok(rec)
    }
}

// =============================================================================
// Restore
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub total_lines: usize,
    pub loaded_records: usize,
    pub skipped_lines: usize,
    pub symbols: usize,
    /// Symbols whose restored progress exceeds the current window.
    /// Clamped lazily on their next advance.
    pub clamped_symbols: Vec<String>,
}

/// Latest good record per symbol from the log at `path`.
pub fn scan_log(
    path: &Path,
    logger: &Logger,
) -> std::io::Result<(BTreeMap<String, PersistedRecord>, RestoreReport)> {
    let lines = Wal::replay(path)?;
    let mut report = RestoreReport {
        total_lines: lines.len(),
        ..Default::default()
    };
    let mut latest: BTreeMap<String, PersistedRecord> = BTreeMap::new();

    for (idx, bytes) in lines.iter().enumerate() {
        match PersistedRecord::parse(bytes, idx + 1) {
            Ok(rec) => {
                report.loaded_records += 1;
                let newer = latest
                    .get(&rec.symbol)
                    .map_or(true, |cur| rec.engine_timestamp_ms >= cur.engine_timestamp_ms);
                if newer {
                    latest.insert(rec.symbol.clone(), rec);
                }
            }
            Err(err) => {
                report.skipped_lines += 1;
                logger.warn(
                    Domain::Store,
                    "store.skip_line",
                    obj(&[
                        ("line", v_int((idx + 1) as i64)),
                        ("msg", v_str(&err.to_string())),
                    ]),
                );
            }
        }
    }
    report.symbols = latest.len();
    Ok((latest, report))
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub appends: u64,
    pub compactions: u64,
    pub compaction_failures: u64,
    pub appends_since_compaction: u64,
    pub rollbacks: u64,
}

#[derive(Debug)]
struct StoreInner {
    wal: Wal,
    /// Live state per symbol, including timestamp-only advances
    states: BTreeMap<String, HysteresisState>,
    /// Last durable record per symbol
    durable: BTreeMap<String, PersistedRecord>,
    stats: StoreStats,
}

#[derive(Debug)]
pub struct StateStore {
    inner: Mutex<StoreInner>,
    path: PathBuf,
    compact_every: u64,
    logger: Arc<Logger>,
}

impl StateStore {
    /// Restore from the log at `config.path` and open it for appending.
    pub fn open(
        config: &StoreConfig,
        hysteresis: &HysteresisConfig,
        logger: Arc<Logger>,
    ) -> EngineResult<(Self, RestoreReport)> {
        let io_err = |source: std::io::Error| EngineError::Persistence { symbol: None, source };
        let (durable, mut report) = scan_log(&config.path, &logger).map_err(io_err)?;
        let wal = Wal::open(&config.path).map_err(io_err)?;

        let mut states = BTreeMap::new();
        for (symbol, rec) in &durable {
            if rec.progress_current > hysteresis.window_updates {
                report.clamped_symbols.push(symbol.clone());
                logger.warn(
                    Domain::Store,
                    "store.restore_progress_exceeds_window",
                    obj(&[
                        ("symbol", v_str(symbol)),
                        ("progress_current", v_int(rec.progress_current as i64)),
                        ("window_updates", v_int(hysteresis.window_updates as i64)),
                    ]),
                );
            }
            states.insert(symbol.clone(), rec.to_state(hysteresis));
        }

        logger.info(
            Domain::Store,
            "store.restore",
            obj(&[
                ("path", v_str(&config.path.to_string_lossy())),
                ("total_lines", v_int(report.total_lines as i64)),
                ("loaded_records", v_int(report.loaded_records as i64)),
                ("skipped_lines", v_int(report.skipped_lines as i64)),
                ("symbols", v_int(report.symbols as i64)),
            ]),
        );

        let store = Self {
            inner: Mutex::new(StoreInner {
                wal,
                states,
                durable,
                stats: StoreStats::default(),
            }),
            path: config.path.clone(),
            compact_every: config.compact_every,
            logger,
        };
        Ok((store, report))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Independent copy of the live state for `symbol`.
    pub fn get(&self, symbol: &str) -> Option<HysteresisState> {
        self.lock().states.get(symbol).cloned()
    }

    pub fn last_timestamp(&self, symbol: &str) -> Option<i64> {
        self.lock().states.get(symbol).map(|s| s.timestamp_ms)
    }

    /// Last durable record for `symbol`.
    pub fn durable_record(&self, symbol: &str) -> Option<PersistedRecord> {
        self.lock().durable.get(symbol).cloned()
    }

    /// Independent copies of every live state.
    pub fn snapshot(&self) -> BTreeMap<String, HysteresisState> {
        self.lock().states.clone()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.lock().states.keys().cloned().collect()
    }

    pub fn stats(&self) -> StoreStats {
        self.lock().stats.clone()
    }

    pub fn set_faults(&self, faults: FaultProfile) {
        self.lock().wal.set_faults(faults);
    }

    /// Install `next` as the live state for its symbol.
    ///
    /// Appends a record first when the change is material. If the append
    /// fails the previous entry is restored (or removed if there was none)
    /// and a persistence error is returned. If the append succeeds but the
    /// inline compaction it triggers fails, `next` stays installed and a
    /// persistence error is returned. Otherwise returns whether a record was
    /// appended.
    pub fn commit(&self, next: HysteresisState) -> EngineResult<bool> {
        let mut inner = self.lock();
        let symbol = next.symbol.clone();

        let material = materially_advanced(inner.states.get(&symbol), &next);
        if !material {
            inner.states.insert(symbol, next);
            return Ok(false);
        }

        let record = PersistedRecord::from_state(&next);
        let line = record.to_line()?;
        let prior_state = inner.states.insert(symbol.clone(), next);
        let prior_record = inner.durable.insert(symbol.clone(), record);

        if let Err(source) = inner.wal.append(&line) {
            restore_entry(&mut inner.states, &symbol, prior_state);
            restore_entry(&mut inner.durable, &symbol, prior_record);
            inner.stats.rollbacks += 1;
            self.logger.error(
                Domain::Store,
                "store.rollback",
                obj(&[("symbol", v_str(&symbol)), ("msg", v_str(&source.to_string()))]),
            );
            return Err(EngineError::Persistence {
                symbol: Some(symbol),
                source,
            });
        }

        inner.stats.appends += 1;
        inner.stats.appends_since_compaction += 1;
        self.logger.debug(
            Domain::Store,
            "store.append",
            obj(&[("symbol", v_str(&symbol)), ("bytes", v_int(line.len() as i64 + 1))]),
        );

        if self.compact_every > 0 && inner.stats.appends_since_compaction >= self.compact_every {
            // The record is durable and stays installed; the failure still
            // reaches the caller so it can fail-stop.
            if let Err(err) = self.compact_locked(&mut inner) {
                self.logger.error(
                    Domain::Store,
                    "store.compaction_failed",
                    obj(&[("symbol", v_str(&symbol)), ("msg", v_str(&err.to_string()))]),
                );
                return Err(match err {
                    EngineError::Persistence { source, .. } => EngineError::Persistence {
                        symbol: Some(symbol),
                        source,
                    },
                    other => other,
                });
            }
        }
        Ok(true)
    }

    /// Rewrite the log to one record per symbol.
    pub fn compact(&self) -> EngineResult<()> {
        let mut inner = self.lock();
        self.compact_locked(&mut inner)
    }

    fn compact_locked(&self, inner: &mut StoreInner) -> EngineResult<()> {
        inner.stats.appends_since_compaction = 0;
        let lines = inner
            .durable
            .values()
            .map(PersistedRecord::to_line)
            .collect::<EngineResult<Vec<_>>>()?;

        if let Err(source) = inner.wal.rewrite(&lines) {
            inner.stats.compaction_failures += 1;
            return Err(EngineError::Persistence { symbol: None, source });
        }
        inner.stats.compactions += 1;
        self.logger.info(
            Domain::Store,
            "store.compaction",
            obj(&[("records", v_int(lines.len() as i64))]),
        );
        Ok(())
    }
}

fn restore_entry<V>(map: &mut BTreeMap<String, V>, key: &str, prior: Option<V>) {
    match prior {
        Some(v) => {
            map.insert(key.to_string(), v);
        }
        None => {
            map.remove(key);
        }
    }
}
