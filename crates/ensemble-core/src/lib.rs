//! # ensemble-core
//!
//! Core types for the Ensemble multi-agent coordination engine.
//!
//! A run takes one coarse task, hands it round by round to a fixed team of
//! specialist workers, watches for rounds that make no progress, and ends with
//! exactly one terminal event.
//!
//! ## Core Paradigm
//!
//! - A run owns its state outright (no process-wide agent registry)
//! - Rounds are append-only records, indexed by position
//! - Events are closed value types, matched exhaustively by observers
//! - Per-round failures are data, only structural errors stop a run

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{EnsembleConfig, ModelConfig, RunConfig};
pub use error::{ConfigError, EnsembleError, Result, WorkerError};
pub use types::*;
