//! # ensemble-orchestrator
//!
//! Coordination engine for Ensemble.
//!
//! This crate provides:
//! - [`EventBus`], a bounded publish/subscribe channel for run events
//! - [`RoundCoordinator`], which dispatches one round to the selected participants
//! - Selection and progress policies ([`RelevancePolicy`], [`SimilarityJudge`])
//! - [`StallDetector`] and the [`ResetPolicy`] used to recover from stalls
//! - A pure status state machine ([`transition`])
//! - [`Orchestrator`], the run loop, and [`ActivityLogger`], a transcript subscriber
//!
//! ## Key Pattern
//!
//! Decisions are pure and replayable: selection, judging and transitions are
//! deterministic functions of the history. All I/O (worker calls, publishing,
//! timers) lives in the run loop and the round coordinator.

mod activity_logger;
mod event_bus;
mod judge;
mod orchestrator;
mod prompt;
mod round;
mod selection;
mod stall;
mod state_machine;
mod text;

pub use activity_logger::ActivityLogger;
pub use event_bus::{EventBus, SubscriberId, Subscription, SubscriptionMode};
pub use judge::{ProgressJudge, SimilarityJudge, Verdict};
pub use orchestrator::{Orchestrator, RunHandle, RunOutcome, ORCHESTRATOR};
pub use prompt::{build_round_prompt, build_synthesis_prompt, summarize_rounds, PromptContext};
pub use round::{RoundCoordinator, RoundInput, RoundResult};
pub use selection::{BroadcastPolicy, RelevancePolicy, Selection, SelectionPolicy};
pub use stall::{LedgerReset, ResetPolicy, StallDetector, StallVerdict};
pub use state_machine::{transition, Action, Signal, State};
pub use text::{jaccard, normalized_words, subtasks};
