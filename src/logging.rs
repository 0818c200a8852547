//! Structured JSON-lines logging.
//!
//! Every record carries `ts`, `run_id`, `seq`, `lvl`, `component`, `event`,
//! `msg`, the promoted `symbol` when present, and a `data` object with the
//! remaining fields.
//!
//! There is no global logger. Build a [`Logger`] and hand it (as
//! `Arc<Logger>`) to the store and the runner; its lifetime is theirs.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

// =============================================================================
// Log Levels
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    pub fn from_env() -> Self {
        match std::env::var("LOG_LEVEL").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            Ok("error") => Level::Error,
            Ok("fatal") => Level::Fatal,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
        }
    }
}

// =============================================================================
// Log Domains (categories for filtering)
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Belief,     // Evidence folding
    Hysteresis, // Candidate, gate, commit decisions
    Store,      // Append, compaction, restore
    Runner,     // Coordinator invariants and fail-stop
    System,     // Startup, shutdown
    Audit,      // Published state digests
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Belief => "belief",
            Domain::Hysteresis => "hysteresis",
            Domain::Store => "store",
            Domain::Runner => "runner",
            Domain::System => "system",
            Domain::Audit => "audit",
        }
    }

    fn parse_list(list: &str) -> Option<Vec<Domain>> {
        if list.trim() == "all" {
            return None;
        }
        let all = [
            Domain::Belief,
            Domain::Hysteresis,
            Domain::Store,
            Domain::Runner,
            Domain::System,
            Domain::Audit,
        ];
        Some(
            list.split(',')
                .filter_map(|d| all.iter().copied().find(|x| x.as_str() == d.trim()))
                .collect(),
        )
    }
}

// =============================================================================
// Sinks
// =============================================================================

pub enum Sink {
    Stdout,
    File(BufWriter<File>),
    /// Keeps lines in memory; used by tests to assert on emitted events.
    Memory(Vec<String>),
    Null,
}

impl Sink {
    fn write_line(&mut self, line: &str) {
        match self {
            Sink::Stdout => println!("{}", line),
            Sink::File(w) => {
                let _ = writeln!(w, "{}", line);
            }
            Sink::Memory(lines) => lines.push(line.to_string()),
            Sink::Null => {}
        }
    }

    fn flush(&mut self) {
        if let Sink::File(w) = self {
            let _ = w.flush();
        }
    }
}

// =============================================================================
// Logger
// =============================================================================

pub struct Logger {
    run_id: String,
    min_level: Level,
    /// None means every domain is enabled
    domains: Option<Vec<Domain>>,
    seq: AtomicU64,
    sink: Mutex<Sink>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("run_id", &self.run_id)
            .field("min_level", &self.min_level)
            .field("domains", &self.domains)
            .finish()
    }
}

impl Logger {
    pub fn new(run_id: impl Into<String>, min_level: Level, sink: Sink) -> Self {
        Self {
            run_id: run_id.into(),
            min_level,
            domains: None,
            seq: AtomicU64::new(0),
            sink: Mutex::new(sink),
        }
    }

    pub fn stdout(run_id: impl Into<String>) -> Self {
        Self::new(run_id, Level::Info, Sink::Stdout)
    }

    pub fn null() -> Self {
        Self::new("null", Level::Fatal, Sink::Null)
    }

    pub fn memory(min_level: Level) -> Self {
        Self::new("mem", min_level, Sink::Memory(Vec::new()))
    }

    /// Write `<base>/<run_id>/events.jsonl` plus a `manifest.json`.
    pub fn to_run_dir(base: &Path, run_id: impl Into<String>, min_level: Level) -> std::io::Result<Self> {
        let run_id = run_id.into();
        let run_dir = base.join(&run_id);
        create_dir_all(&run_dir)?;
        std::fs::write(
            run_dir.join("manifest.json"),
            json!({
                "run_id": run_id,
                "ts": ts_now(),
                "pid": process::id(),
                "log_dir": run_dir.to_string_lossy(),
            })
            .to_string(),
        )?;
        let events = File::create(run_dir.join("events.jsonl"))?;
        Ok(Self::new(run_id, min_level, Sink::File(BufWriter::new(events))))
    }

    /// `LOG_LEVEL`, `LOG_DOMAINS`, `RUN_ID`, `LOG_DIR`. Without `LOG_DIR`
    /// records go to stdout.
    pub fn from_env() -> Self {
        let run_id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("r-{}-{}", ts_epoch_ms(), process::id()));
        let level = Level::from_env();
        let logger = match std::env::var("LOG_DIR") {
            Ok(dir) => Self::to_run_dir(Path::new(&dir), run_id.clone(), level).unwrap_or_else(|err| {
                eprintln!("[log] failed to create run dir: {}", err);
                Self::new(run_id, level, Sink::Stdout)
            }),
            Err(_) => Self::new(run_id, level, Sink::Stdout),
        };
        match std::env::var("LOG_DOMAINS") {
            Ok(list) => logger.with_domains(Domain::parse_list(&list)),
            Err(_) => logger,
        }
    }

    pub fn with_domains(mut self, domains: Option<Vec<Domain>>) -> Self {
        self.domains = domains;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn enabled(&self, level: Level, domain: Domain) -> bool {
        level >= self.min_level
            && self
                .domains
                .as_ref()
                .map_or(true, |ds| ds.contains(&domain))
    }

    /// Emit a structured log entry
    pub fn log(&self, level: Level, domain: Domain, event: &str, fields: Map<String, Value>) {
        if !self.enabled(level, domain) {
            return;
        }
        let line = self.render(level, domain, event, fields);
        if let Ok(mut sink) = self.sink.lock() {
            sink.write_line(&line);
        }
    }

    pub fn debug(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Debug, domain, event, fields)
    }

    pub fn info(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Info, domain, event, fields)
    }

    pub fn warn(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Warn, domain, event, fields)
    }

    pub fn error(&self, domain: Domain, event: &str, fields: Map<String, Value>) {
        self.log(Level::Error, domain, event, fields)
    }

    pub fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            sink.flush();
        }
    }

    /// Lines captured by a memory sink (empty for other sinks).
    pub fn lines(&self) -> Vec<String> {
        match self.sink.lock() {
            Ok(sink) => match &*sink {
                Sink::Memory(lines) => lines.clone(),
                _ => Vec::new(),
            },
            Err(_) => Vec::new(),
        }
    }

    /// Captured lines whose `event` equals `event`.
    pub fn events_named(&self, event: &str) -> Vec<Value> {
        self.lines()
            .iter()
            .filter_map(|l| serde_json::from_str::<Value>(l).ok())
            .filter(|v| v.get("event").and_then(|e| e.as_str()) == Some(event))
            .collect()
    }

    fn render(&self, level: Level, domain: Domain, event: &str, mut fields: Map<String, Value>) -> String {
        let msg = fields.remove("msg").unwrap_or(Value::String(String::new()));
        let symbol = fields.remove("symbol");

        let mut entry = Map::new();
        entry.insert("ts".to_string(), json!(ts_now()));
        entry.insert("run_id".to_string(), json!(self.run_id));
        entry.insert("seq".to_string(), json!(self.seq.fetch_add(1, Ordering::SeqCst)));
        entry.insert("lvl".to_string(), json!(level.as_str().to_uppercase()));
        entry.insert("component".to_string(), json!(domain.as_str()));
        entry.insert("event".to_string(), json!(event));
        entry.insert("msg".to_string(), msg);
        if let Some(symbol) = symbol {
            entry.insert("symbol".to_string(), symbol);
        }
        entry.insert("data".to_string(), Value::Object(fields));
        Value::Object(entry).to_string()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.flush();
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// RFC3339 timestamp with milliseconds
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Epoch milliseconds
pub fn ts_epoch_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    let mut map = Map::new();
    for (k, v) in pairs {
        map.insert((*k).to_string(), v.clone());
    }
    map
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

pub fn v_int(n: i64) -> Value {
    json!(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Fatal);
    }

    #[test]
    fn test_record_shape() {
        let logger = Logger::memory(Level::Debug);
        logger.info(
            Domain::Store,
            "store.append",
            obj(&[("symbol", v_str("BTCUSDT")), ("msg", v_str("appended")), ("bytes", v_int(120))]),
        );
        let lines = logger.lines();
        assert_eq!(lines.len(), 1);
        let v: Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(v["lvl"], "INFO");
        assert_eq!(v["component"], "store");
        assert_eq!(v["event"], "store.append");
        assert_eq!(v["symbol"], "BTCUSDT");
        assert_eq!(v["msg"], "appended");
        assert_eq!(v["data"]["bytes"], 120);
        assert_eq!(v["run_id"], "mem");
    }

    #[test]
    fn test_level_and_domain_filtering() {
        let logger = Logger::memory(Level::Info).with_domains(Some(vec![Domain::Runner]));
        logger.debug(Domain::Runner, "dropped.level", Map::new());
        logger.info(Domain::Store, "dropped.domain", Map::new());
        logger.warn(Domain::Runner, "kept", Map::new());
        assert_eq!(logger.lines().len(), 1);
        assert_eq!(logger.events_named("kept").len(), 1);
    }

    #[test]
    fn test_seq_increments() {
        let logger = Logger::memory(Level::Trace);
        logger.info(Domain::System, "a", Map::new());
        logger.info(Domain::System, "b", Map::new());
        let a = &logger.events_named("a")[0];
        let b = &logger.events_named("b")[0];
        assert!(b["seq"].as_u64().unwrap() > a["seq"].as_u64().unwrap());
    }

    #[test]
    fn test_parse_domain_list() {
        assert_eq!(Domain::parse_list("all"), None);
        assert_eq!(
            Domain::parse_list("store, runner,bogus"),
            Some(vec![Domain::Store, Domain::Runner])
        );
    }

    #[test]
    fn test_run_dir_sink_writes_manifest_and_events() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let logger = Logger::to_run_dir(dir.path(), "r-test", Level::Info).unwrap();
            logger.info(Domain::System, "startup", Map::new());
        }
        let run_dir = dir.path().join("r-test");
        assert!(run_dir.join("manifest.json").exists());
        let events = std::fs::read_to_string(run_dir.join("events.jsonl")).unwrap();
        assert!(events.contains("\"event\":\"startup\""));
    }
}
