//! Stabilized per-symbol market regime classification.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Evidence   │────►│    Belief    │────►│  Hysteresis  │────►│    Store     │
//! │  (opinions)  │     │ (winner-all) │     │  (pure fn)   │     │ (NDJSON log) │
//! └──────────────┘     └──────────────┘     └──────────────┘     └──────────────┘
//!                                                  │
//!                                                  ▼
//!                                          StatePublished
//! ```
//!
//! [`runner::EngineRunner`] ties the stages together and enforces
//! per-symbol timestamp ordering, transactional appends and fail-stop.

pub mod belief;
pub mod config;
pub mod error;
pub mod fault;
pub mod hysteresis;
pub mod logging;
pub mod regime;
pub mod reliability;
pub mod runner;

pub use belief::{BeliefState, EvidenceBatch, EvidenceOpinion};
pub use config::{EngineConfig, HysteresisConfig, StoreConfig};
pub use error::{EngineError, EngineResult};
pub use hysteresis::{advance, materially_advanced, HysteresisState};
pub use regime::Regime;
pub use reliability::store::{PersistedRecord, RestoreReport, StateStore};
pub use runner::{EngineRunner, StatePublished};
