//! Engram - Tiered memory lifecycle engine for conversational agents
//!
//! Facts live in one of three tiers: a pinned Core file, a decaying and
//! capacity-bounded Working tier held by an external note store, and an
//! append-only Archive log from which forgotten notes can be restored.

pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod storage;
pub mod testing;

pub use engine::{IngestOutcome, MaintenanceReport, MemoryEngine, ReconcileReport};
pub use error::EngramError;
