//! # ensemble-agent
//!
//! The worker side of Ensemble.
//!
//! This crate provides:
//! - The [`Worker`] contract (plain and streamed responses, cooperative cancellation)
//! - [`Participant`], which pairs a worker with its key and serializes calls to it
//! - [`ChatWorker`], an OpenAI-compatible chat-completions adapter with a circuit breaker
//! - [`ScriptedWorker`], a deterministic replay worker for dry runs and tests
//! - The default specialist [`roster`] and the tool-boundary [`ApprovalPolicy`]
//!
//! ## Key Pattern
//!
//! The engine never looks inside a worker. A worker that withholds a side effect
//! for approval still answers with an ordinary message describing what it would
//! have done.

mod approval;
mod auth;
mod chat;
mod circuit_breaker;
mod promise;
pub mod roster;
mod scripted;
mod types;
mod worker;

pub use approval::{ApprovalPolicy, PolicyDecision, ToolAction};
pub use auth::get_api_key;
pub use chat::ChatWorker;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use promise::CompletionPromise;
pub use roster::Specialist;
pub use scripted::{ScriptStep, ScriptedWorker};
pub use types::*;
pub use worker::{
    CallGuard, CallPolicy, Participant, ResponseStream, StreamItem, Worker, WorkerResult,
};
