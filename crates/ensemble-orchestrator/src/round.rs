//! One dispatch-and-collect cycle
//!
//! The coordinator asks the selection policy who acts, builds each prompt,
//! streams every selected participant concurrently against one shared round
//! deadline, publishes deltas and messages as they arrive, and judges each
//! response. Worker failures become data on the turn; they never abort a round.

use ensemble_agent::{Participant, StreamItem, WorkerResult};
use ensemble_core::{
    Event, Message, MessageKind, ParticipantInfo, Round, RunConfig, Task, Turn, TurnOutcome,
    WorkerError,
};
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::event_bus::EventBus;
use crate::judge::{ProgressJudge, Verdict};
use crate::prompt::{build_round_prompt, PromptContext};
use crate::selection::{Selection, SelectionPolicy};

/// What the coordinator needs to know about the run so far
#[derive(Debug, Clone, Copy)]
pub struct RoundInput<'a> {
    pub task: &'a Task,
    pub participants: &'a [Participant],
    /// Full history; the next round gets index `rounds.len()`
    pub rounds: &'a [Round],
    /// First round replayed into prompts
    pub context_start: usize,
    pub ledger: Option<&'a str>,
}

/// How a round ended
#[derive(Debug, Clone, PartialEq)]
pub enum RoundResult {
    Completed(Round),
    /// Cancellation was observed; the partial round is discarded
    Cancelled,
}

pub struct RoundCoordinator {
    bus: EventBus,
    selection: Arc<dyn SelectionPolicy>,
    judge: Arc<dyn ProgressJudge>,
    per_round_timeout: Duration,
    horizon: usize,
    round_limit: usize,
}

impl RoundCoordinator {
    pub fn new(
        bus: EventBus,
        selection: Arc<dyn SelectionPolicy>,
        judge: Arc<dyn ProgressJudge>,
        config: &RunConfig,
    ) -> Self {
        Self {
            bus,
            selection,
            judge,
            per_round_timeout: config.per_round_timeout(),
            horizon: config.context_horizon,
            round_limit: config.round_limit,
        }
    }

    /// Run round `input.rounds.len()`
    pub async fn run_round(&self, input: RoundInput<'_>, cancel: &CancellationToken) -> RoundResult {
        let index = input.rounds.len();
        let infos: Vec<ParticipantInfo> =
            input.participants.iter().map(|p| p.info().clone()).collect();
        let selections = self.selection.select(input.task, &infos, input.rounds);
        let previous = input.rounds.last().and_then(|r| r.latest_response());
        let context = &input.rounds[input.context_start.min(index)..];
        let deadline = Instant::now() + self.per_round_timeout;

        info!(round = index + 1, selected = selections.len(), "dispatching round");

        let mut calls = Vec::with_capacity(selections.len());
        for selection in selections {
            let Some(participant) = input.participants.iter().find(|p| p.key() == selection.participant)
            else {
                warn!(participant = %selection.participant, "selection named an unknown participant");
                continue;
            };
            let prompt = build_round_prompt(&PromptContext {
                task: input.task,
                participant: participant.info(),
                focus: selection.focus.as_deref(),
                rounds: context,
                ledger: input.ledger,
                horizon: self.horizon,
                round_index: index,
                round_limit: self.round_limit,
            });
            self.bus
                .publish(Event::notice(
                    Some(index),
                    MessageKind::Instruction,
                    instruction_text(&selection),
                ))
                .await;
            calls.push(self.run_turn(index, participant, selection, prompt, previous, deadline, cancel));
        }

        let turns = join_all(calls).await;

        if cancel.is_cancelled() {
            debug!(round = index + 1, "round discarded after cancellation");
            return RoundResult::Cancelled;
        }
        RoundResult::Completed(Round::new(index, turns))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        &self,
        index: usize,
        participant: &Participant,
        selection: Selection,
        prompt: String,
        previous: Option<&str>,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Turn {
        let call = self.stream_call(index, participant, &prompt, cancel);
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            timed = tokio::time::timeout_at(deadline, call) => timed.unwrap_or(Err(WorkerError::TimedOut {
                after_ms: self.per_round_timeout.as_millis() as u64,
            })),
        };

        let (outcome, verdict) = match result {
            Ok(message) => {
                let verdict = self.judge.judge(&message.text, previous);
                debug!(
                    round = index + 1,
                    participant = participant.key(),
                    progressed = verdict.progressed,
                    complete = verdict.complete,
                    "turn judged"
                );
                self.bus
                    .publish(Event::AgentMessage {
                        round: index,
                        participant: participant.key().to_string(),
                        message: message.clone(),
                    })
                    .await;
                (TurnOutcome::Responded(message), verdict)
            }
            Err(err) => {
                if !cancel.is_cancelled() {
                    warn!(round = index + 1, participant = participant.key(), "turn failed: {}", err);
                    self.bus
                        .publish(Event::notice(
                            Some(index),
                            MessageKind::Notice,
                            format!("{} failed: {}", participant.key(), err),
                        ))
                        .await;
                }
                (TurnOutcome::Failed(err), Verdict::default())
            }
        };

        Turn {
            participant: participant.key().to_string(),
            focus: selection.focus,
            prompt,
            outcome,
            progressed: verdict.progressed,
            complete: verdict.complete,
        }
    }

    async fn stream_call(
        &self,
        index: usize,
        participant: &Participant,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> WorkerResult<Message> {
        let _guard = participant.acquire(cancel).await?;
        let mut stream = participant.worker().respond_streaming(prompt, cancel);

        while let Some(item) = stream.next().await {
            match item? {
                StreamItem::Chunk(chunk) => {
                    self.bus
                        .publish(Event::AgentDelta {
                            round: index,
                            participant: participant.key().to_string(),
                            chunk,
                        })
                        .await;
                }
                StreamItem::Done(message) => return Ok(message),
            }
        }
        Err(WorkerError::InvalidResponse(
            "stream ended without a final message".to_string(),
        ))
    }
}

fn instruction_text(selection: &Selection) -> String {
    match &selection.focus {
        Some(focus) => format!("{}, please take: {}", selection.participant, focus),
        None => format!("{}, please continue the task", selection.participant),
    }
}
