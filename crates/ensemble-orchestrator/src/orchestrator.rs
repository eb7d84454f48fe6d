//! Run lifecycle: plan, round loop, stall recovery, synthesis, terminal event
//!
//! One [`Orchestrator`] describes a team and its policies. Each call to
//! [`Orchestrator::run`] takes the pending event bus, leaves a fresh one for
//! the next run, drives the pure state machine until it reaches a terminal
//! status, publishes exactly one terminal event and closes its bus.
//! Subscriptions taken between runs belong to the next run.

use ensemble_agent::Participant;
use ensemble_core::{
    ConfigError, EnsembleError, Event, Message, MessageKind, Round, RunConfig, RunStatus, Task,
    WorkerError,
};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event_bus::{EventBus, Subscription, SubscriptionMode};
use crate::judge::{ProgressJudge, SimilarityJudge};
use crate::prompt::{build_synthesis_prompt, summarize_rounds};
use crate::round::{RoundCoordinator, RoundInput, RoundResult};
use crate::selection::{RelevancePolicy, SelectionPolicy};
use crate::stall::{LedgerReset, ResetPolicy, StallDetector};
use crate::state_machine::{transition, Action, Signal, State};
use crate::text::subtasks;

/// Author of messages the orchestrator writes itself
pub const ORCHESTRATOR: &str = "orchestrator";

/// Everything a finished run leaves behind
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub task: Task,
    pub status: RunStatus,
    pub rounds: Vec<Round>,
    pub reset_count: usize,
    pub stall_count: usize,
    /// Statuses visited, consecutive repeats collapsed
    pub status_history: Vec<RunStatus>,
    pub final_result: Option<Message>,
    pub failure: Option<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

/// A spawned run
pub struct RunHandle {
    /// Streaming subscription registered before the run started
    pub events: Subscription,
    pub cancel: CancellationToken,
    /// For late subscribers
    pub bus: EventBus,
    pub join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    /// Wait for the run to finish
    pub async fn outcome(self) -> ensemble_core::Result<RunOutcome> {
        self.join
            .await
            .map_err(|e| EnsembleError::Other(format!("run task failed: {}", e)))
    }
}

/// Per-run mutable state, owned by the run loop
struct RunState {
    task: Task,
    bus: EventBus,
    machine: State,
    stall: StallDetector,
    rounds: Vec<Round>,
    status_history: Vec<RunStatus>,
    context_start: usize,
    ledger: Option<String>,
    final_result: Option<Message>,
    failure: Option<String>,
}

impl RunState {
    fn new(task: Task, bus: EventBus, config: &RunConfig) -> Self {
        Self {
            task,
            bus,
            machine: State::new(config.round_limit),
            stall: StallDetector::from_config(config),
            rounds: Vec::new(),
            status_history: vec![RunStatus::Planning],
            context_start: 0,
            ledger: None,
            final_result: None,
            failure: None,
        }
    }

    fn enter(&mut self, status: RunStatus) {
        if self.status_history.last() != Some(&status) {
            self.status_history.push(status);
        }
    }

    fn into_outcome(self) -> RunOutcome {
        RunOutcome {
            task: self.task,
            status: self.machine.status,
            rounds: self.rounds,
            reset_count: self.stall.reset_count(),
            stall_count: self.stall.stall_count(),
            status_history: self.status_history,
            final_result: self.final_result,
            failure: self.failure,
        }
    }
}

/// Coordinates a fixed team of participants on one task at a time
pub struct Orchestrator {
    config: RunConfig,
    participants: Vec<Participant>,
    selection: Arc<dyn SelectionPolicy>,
    judge: Arc<dyn ProgressJudge>,
    reset: Arc<dyn ResetPolicy>,
    /// Bus the next run publishes on
    pending_bus: Mutex<EventBus>,
}

impl Orchestrator {
    pub fn new(config: RunConfig) -> Self {
        let bus = EventBus::from_config(&config);
        let judge = SimilarityJudge::new(config.similarity_threshold);
        Self {
            config,
            participants: Vec::new(),
            selection: Arc::new(RelevancePolicy),
            judge: Arc::new(judge),
            reset: Arc::new(LedgerReset::default()),
            pending_bus: Mutex::new(bus),
        }
    }

    pub fn with_participant(mut self, participant: Participant) -> Self {
        self.participants.push(participant);
        self
    }

    pub fn register(&mut self, participant: Participant) {
        self.participants.push(participant);
    }

    pub fn with_selection_policy(mut self, policy: impl SelectionPolicy + 'static) -> Self {
        self.selection = Arc::new(policy);
        self
    }

    pub fn with_progress_judge(mut self, judge: impl ProgressJudge + 'static) -> Self {
        self.judge = Arc::new(judge);
        self
    }

    pub fn with_reset_policy(mut self, policy: impl ResetPolicy + 'static) -> Self {
        self.reset = Arc::new(policy);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Bus of the next run
    pub fn bus(&self) -> EventBus {
        self.pending_bus
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Subscribe to the next run's events
    pub fn subscribe(&self, mode: SubscriptionMode) -> Subscription {
        self.bus().subscribe(mode)
    }

    /// Hand the pending bus to a starting run and leave a fresh one behind
    fn take_bus(&self) -> EventBus {
        let mut pending = self
            .pending_bus
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *pending, EventBus::from_config(&self.config))
    }

    /// Spawn the run on the current runtime
    pub fn start(self, task: impl Into<String>) -> RunHandle {
        let bus = self.bus();
        let events = bus.subscribe(SubscriptionMode::Streaming);
        let cancel = CancellationToken::new();
        let task = task.into();
        let token = cancel.clone();
        let join = tokio::spawn(async move { self.run(task, token).await });
        RunHandle {
            events,
            cancel,
            bus,
            join,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()?;
        if self.participants.is_empty() {
            return Err(ConfigError::NoParticipants);
        }
        let mut seen = HashSet::new();
        for participant in &self.participants {
            if !seen.insert(participant.key()) {
                return Err(ConfigError::DuplicateParticipant(participant.key().to_string()));
            }
        }
        if let Some(key) = &self.config.synthesizer {
            if !seen.contains(key.as_str()) {
                return Err(ConfigError::UnknownSynthesizer(key.clone()));
            }
        }
        Ok(())
    }

    /// Run `task` to a terminal status in place
    pub async fn run(&self, task: impl Into<String>, cancel: CancellationToken) -> RunOutcome {
        let mut state = RunState::new(Task::new(task), self.take_bus(), &self.config);
        let coordinator = RoundCoordinator::new(
            state.bus.clone(),
            Arc::clone(&self.selection),
            Arc::clone(&self.judge),
            &self.config,
        );
        info!(task = %state.task.title(), participants = self.participants.len(), "run planning");

        let first = match self.validate() {
            Err(err) => Signal::Fail {
                reason: EnsembleError::Config(err).to_string(),
            },
            Ok(()) if cancel.is_cancelled() => Signal::Cancel {
                reason: "cancelled before start".to_string(),
            },
            Ok(()) => {
                self.publish_plan(&state).await;
                Signal::Start
            }
        };

        let mut actions = VecDeque::new();
        self.apply(&mut state, first, &mut actions);

        while let Some(action) = actions.pop_front() {
            let signal = match action {
                Action::DispatchRound => self.dispatch(&coordinator, &mut state, &cancel).await,
                Action::AnnounceStall { stall_count } => {
                    self.announce_stall(&mut state, stall_count).await;
                    None
                }
                Action::ApplyReset => Some(self.apply_reset(&mut state).await),
                Action::Synthesize => Some(self.synthesize(&mut state, &cancel).await),
                Action::Finish { status, reason } => {
                    self.finish(&mut state, status, reason).await;
                    None
                }
            };
            if let Some(signal) = signal {
                self.apply(&mut state, signal, &mut actions);
            }
        }

        state.into_outcome()
    }

    fn apply(&self, state: &mut RunState, signal: Signal, actions: &mut VecDeque<Action>) {
        let before = state.machine.status;
        let (machine, next) = transition(state.machine, signal);
        state.machine = machine;
        if machine.status != before {
            debug!(from = %before, to = %machine.status, "status change");
        }
        // Stalled is entered before the machine moves on to Resetting/Exhausted
        if next
            .iter()
            .any(|a| matches!(a, Action::AnnounceStall { .. }))
        {
            state.enter(RunStatus::Stalled);
        }
        state.enter(machine.status);
        actions.extend(next);
    }

    async fn publish_plan(&self, state: &RunState) {
        let keys: Vec<&str> = self.participants.iter().map(|p| p.key()).collect();
        let parts = subtasks(&state.task.description);
        let mut text = format!(
            "Team: {}. Up to {} rounds, stall limit {}, reset limit {}.",
            keys.join(", "),
            self.config.round_limit,
            self.config.stall_limit,
            self.config.reset_limit
        );
        if parts.len() > 1 {
            text.push_str("\nSubtasks:");
            for (i, part) in parts.iter().enumerate() {
                text.push_str(&format!("\n{}. {}", i + 1, part));
            }
        }
        state
            .bus
            .publish(Event::notice(None, MessageKind::Plan, text))
            .await;
    }

    async fn dispatch(
        &self,
        coordinator: &RoundCoordinator,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Option<Signal> {
        let interval = self.config.round_interval();
        if !state.rounds.is_empty() && !interval.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
        if cancel.is_cancelled() {
            return Some(cancelled_signal());
        }

        let input = RoundInput {
            task: &state.task,
            participants: &self.participants,
            rounds: &state.rounds,
            context_start: state.context_start,
            ledger: state.ledger.as_deref(),
        };
        let round = match coordinator.run_round(input, cancel).await {
            RoundResult::Completed(round) => round,
            RoundResult::Cancelled => return Some(cancelled_signal()),
        };

        let verdict = state.stall.observe(round.progressed);
        let complete = round.is_complete();
        info!(
            round = round.index + 1,
            progressed = round.progressed,
            complete,
            stall_count = state.stall.stall_count(),
            "round finished"
        );
        if round.progressed {
            let who: Vec<&str> = round
                .turns
                .iter()
                .filter(|t| t.progressed)
                .map(|t| t.participant.as_str())
                .collect();
            state
                .bus
                .publish(Event::notice(
                    Some(round.index),
                    MessageKind::Progress,
                    format!("Round {}: progress from {}", round.index + 1, who.join(", ")),
                ))
                .await;
        }
        state.rounds.push(round);
        Some(Signal::RoundFinished { verdict, complete })
    }

    async fn announce_stall(&self, state: &mut RunState, stall_count: usize) {
        let round = state.rounds.len().checked_sub(1);
        warn!(
            round = state.rounds.len(),
            stall_count,
            stall_limit = self.config.stall_limit,
            "round made no progress"
        );
        state
            .bus
            .publish(Event::notice(
                round,
                MessageKind::Stall,
                format!(
                    "No progress ({} of {} consecutive rounds allowed)",
                    stall_count, self.config.stall_limit
                ),
            ))
            .await;
    }

    async fn apply_reset(&self, state: &mut RunState) -> Signal {
        let ledger = self
            .reset
            .ledger(&state.task, &state.rounds, state.stall.stall_count());
        state.stall.reset_applied();
        state.context_start = state.rounds.len();
        info!(
            reset_count = state.stall.reset_count(),
            reset_limit = self.config.reset_limit,
            context_start = state.context_start,
            "context reset"
        );
        state
            .bus
            .publish(Event::notice(
                state.rounds.len().checked_sub(1),
                MessageKind::Reset,
                format!(
                    "Reset {} of {}: continuing from a compact ledger\n{}",
                    state.stall.reset_count(),
                    self.config.reset_limit,
                    ledger.trim_end()
                ),
            ))
            .await;
        state.ledger = Some(ledger);
        Signal::ResetApplied
    }

    async fn synthesize(&self, state: &mut RunState, cancel: &CancellationToken) -> Signal {
        let result = match &self.config.synthesizer {
            Some(key) => self.call_synthesizer(key, state, cancel).await,
            None => Ok(Message::new(
                ORCHESTRATOR,
                summarize_rounds(&state.task, &state.rounds),
            )),
        };

        match result {
            Ok(message) => {
                state.final_result = Some(message);
                Signal::Synthesized
            }
            Err(EnsembleError::Worker(WorkerError::Cancelled)) if cancel.is_cancelled() => {
                cancelled_signal()
            }
            Err(err) => Signal::Fail {
                reason: err.to_string(),
            },
        }
    }

    async fn call_synthesizer(
        &self,
        key: &str,
        state: &RunState,
        cancel: &CancellationToken,
    ) -> ensemble_core::Result<Message> {
        let participant = self
            .participants
            .iter()
            .find(|p| p.key() == key)
            .ok_or_else(|| EnsembleError::ParticipantNotFound(key.to_string()))?;
        let prompt = build_synthesis_prompt(&state.task, &state.rounds);
        info!(synthesizer = key, "requesting final synthesis");

        let call = async {
            let _guard = participant.acquire(cancel).await?;
            participant.worker().respond(&prompt, cancel).await
        };
        let timeout = self.config.per_round_timeout();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            timed = tokio::time::timeout(timeout, call) => timed.unwrap_or(Err(WorkerError::TimedOut {
                after_ms: timeout.as_millis() as u64,
            })),
        };

        match result {
            Ok(message) if message.text.trim().is_empty() => Err(EnsembleError::Synthesis(
                format!("{} returned an empty result", key),
            )),
            Ok(message) => Ok(message),
            Err(WorkerError::Cancelled) if cancel.is_cancelled() => {
                Err(EnsembleError::Worker(WorkerError::Cancelled))
            }
            Err(err) => Err(EnsembleError::Synthesis(format!("{}: {}", key, err))),
        }
    }

    async fn finish(&self, state: &mut RunState, status: RunStatus, reason: String) {
        let rounds = state.rounds.len();
        let event = match status {
            RunStatus::Succeeded => match &state.final_result {
                Some(message) => Event::FinalResult {
                    message: message.clone(),
                },
                None => {
                    state.failure = Some("succeeded without a final result".to_string());
                    Event::Failure {
                        status: RunStatus::Failed,
                        reason: "succeeded without a final result".to_string(),
                        rounds,
                    }
                }
            },
            RunStatus::Cancelled => {
                state.failure = Some(reason.clone());
                Event::Cancelled { reason, rounds }
            }
            _ => {
                state.failure = Some(reason.clone());
                Event::Failure {
                    status,
                    reason,
                    rounds,
                }
            }
        };

        match status {
            RunStatus::Succeeded => info!(rounds, "run succeeded"),
            RunStatus::Cancelled => info!(rounds, "run cancelled"),
            _ => warn!(rounds, %status, reason = state.failure.as_deref().unwrap_or(""), "run ended"),
        }

        state.bus.publish(event).await;
        state.bus.close();
    }
}

fn cancelled_signal() -> Signal {
    Signal::Cancel {
        reason: "cancellation requested".to_string(),
    }
}
