//! Integration test: the append log survives restarts, compaction and junk.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regime_anchor::logging::{Level, Logger};
use regime_anchor::reliability::store::scan_log;
use regime_anchor::reliability::wal::Wal;
use regime_anchor::{HysteresisConfig, HysteresisState, PersistedRecord, Regime, StateStore, StoreConfig};
use tempfile::TempDir;

const SYMBOLS: [&str; 3] = ["BTCUSDT", "ETHUSDT", "SOLUSDT"];

fn hcfg(window: u32) -> HysteresisConfig {
    HysteresisConfig {
        window_updates: window,
        ..Default::default()
    }
}

fn open(path: &Path, compact_every: u64, window: u32) -> StateStore {
    let cfg = StoreConfig {
        path: path.to_path_buf(),
        compact_every,
    };
    StateStore::open(&cfg, &hcfg(window), Arc::new(Logger::null()))
        .unwrap()
        .0
}

fn random_state(rng: &mut StdRng, symbol: &str, ts: i64, window: u32) -> HysteresisState {
    let anchor = Regime::ALL[rng.gen_range(0..Regime::COUNT)];
    let candidate = if rng.gen_bool(0.5) {
        Some(Regime::ALL[rng.gen_range(0..Regime::COUNT)])
    } else {
        None
    };
    HysteresisState {
        symbol: symbol.to_string(),
        timestamp_ms: ts,
        anchor_regime: anchor,
        candidate_regime: candidate,
        progress_current: if candidate.is_some() { rng.gen_range(1..=window) } else { 0 },
        progress_required: window,
        last_commit_timestamp_ms: if rng.gen_bool(0.3) { Some(ts) } else { None },
        reason_codes: vec![],
        debug: None,
    }
}

/// Drive `store` with a seeded stream of states; returns the last record
/// committed per symbol.
fn drive(store: &StateStore, seed: u64, steps: usize) -> Vec<(String, PersistedRecord)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ts = [0i64; SYMBOLS.len()];
    for _ in 0..steps {
        let k = rng.gen_range(0..SYMBOLS.len());
        ts[k] += rng.gen_range(0..5_000);
        store.commit(random_state(&mut rng, SYMBOLS[k], ts[k], 4)).unwrap();
    }
    SYMBOLS
        .iter()
        .filter_map(|s| store.durable_record(s).map(|r| (s.to_string(), r)))
        .collect()
}

#[test]
fn test_restore_returns_latest_durable_record_per_symbol() {
    for seed in 0..8u64 {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.jsonl");
        let expected = {
            let store = open(&path, 0, 4);
            drive(&store, seed, 200)
        };

        let restored = open(&path, 0, 4);
        for (symbol, rec) in expected {
            assert_eq!(restored.durable_record(&symbol), Some(rec.clone()), "seed {seed}");
            let state = restored.get(&symbol).unwrap();
            assert_eq!(state, rec.to_state(&hcfg(4)));
            assert_eq!(state.progress_required, 4);
        }
    }
}

#[test]
fn test_compaction_preserves_restore_result() {
    for seed in 0..8u64 {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.jsonl");
        let store = open(&path, 0, 4);
        drive(&store, seed, 150);
        drop(store);

        let logger = Logger::null();
        let (before, _) = scan_log(&path, &logger).unwrap();
        let uncompacted_lines = Wal::replay(&path).unwrap().len();

        let store = open(&path, 0, 4);
        store.compact().unwrap();
        drop(store);

        let (after, report) = scan_log(&path, &logger).unwrap();
        assert_eq!(before, after, "seed {seed}");
        assert_eq!(report.total_lines, after.len());
        assert!(report.total_lines <= uncompacted_lines);
    }
}

#[test]
fn test_inline_compaction_matches_uncompacted_log() {
    let dir = TempDir::new().unwrap();
    let plain = dir.path().join("plain.jsonl");
    let compacted = dir.path().join("compacted.jsonl");

    drive(&open(&plain, 0, 4), 42, 300);
    let store = open(&compacted, 16, 4);
    drive(&store, 42, 300);
    assert!(store.stats().compactions > 0);
    drop(store);

    let logger = Logger::null();
    let (a, _) = scan_log(&plain, &logger).unwrap();
    let (b, _) = scan_log(&compacted, &logger).unwrap();
    assert_eq!(a, b);
    assert!(Wal::replay(&compacted).unwrap().len() < Wal::replay(&plain).unwrap().len());
}

#[test]
fn test_torn_tail_from_crash_is_skipped_and_log_stays_usable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.jsonl");
    let expected = {
        let store = open(&path, 0, 4);
        drive(&store, 7, 50)
    };

    // Simulate a crash mid-write.
    let mut f = OpenOptions::new().append(true).open(&path).unwrap();
    f.write_all(b"{\"schema\":\"hysteresis_store_record\",\"schema_ver").unwrap();
    drop(f);

    let logger = Arc::new(Logger::memory(Level::Warn));
    let cfg = StoreConfig::new(&path);
    let (store, report) = StateStore::open(&cfg, &hcfg(4), logger.clone()).unwrap();
    assert_eq!(report.skipped_lines, 1);
    assert_eq!(logger.events_named("store.skip_line").len(), 1);
    for (symbol, rec) in &expected {
        assert_eq!(store.durable_record(symbol).as_ref(), Some(rec));
    }

    let next_ts = expected.iter().map(|(_, r)| r.engine_timestamp_ms).max().unwrap_or(0) + 1;
    let mut rng = StdRng::seed_from_u64(99);
    let fresh = random_state(&mut rng, "ADAUSDT", next_ts, 4);
    assert!(store.commit(fresh.clone()).unwrap());
    drop(store);

    let (latest, report) = scan_log(&path, &Logger::null()).unwrap();
    assert_eq!(report.skipped_lines, 1);
    assert_eq!(latest["ADAUSDT"], PersistedRecord::from_state(&fresh));
}

#[test]
fn test_unrelated_and_blank_lines_are_tolerated() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.jsonl");
    let state = HysteresisState {
        symbol: "BTCUSDT".to_string(),
        timestamp_ms: 10,
        anchor_regime: Regime::TrendExhaustion,
        candidate_regime: None,
        progress_current: 0,
        progress_required: 3,
        last_commit_timestamp_ms: Some(10),
        reason_codes: vec![],
        debug: None,
    };
    let good = PersistedRecord::from_state(&state).to_line().unwrap();
    let body = format!(
        "\n{{\"kind\":\"heartbeat\"}}\n{good}\n\n[1,2,3]\n{{\"schema\":\"hysteresis_store_record\",\"schema_version\":\"9\"}}\n"
    );
    fs::write(&path, body).unwrap();

    let cfg = StoreConfig::new(&path);
    let (store, report) = StateStore::open(&cfg, &hcfg(3), Arc::new(Logger::null())).unwrap();
    assert_eq!(report.total_lines, 4);
    assert_eq!(report.loaded_records, 1);
    assert_eq!(report.skipped_lines, 3);
    assert_eq!(store.get("BTCUSDT").unwrap().anchor_regime, Regime::TrendExhaustion);
}

#[test]
fn test_missing_log_starts_empty_and_creates_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state").join("store.jsonl");
    let cfg = StoreConfig::new(&path);
    let (store, report) = StateStore::open(&cfg, &hcfg(3), Arc::new(Logger::null())).unwrap();
    assert_eq!(report.total_lines, 0);
    assert!(store.symbols().is_empty());
    assert!(path.exists());
}
