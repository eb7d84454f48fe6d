//! Pure state machine for the run lifecycle
//!
//! `transition(state, signal) -> (state, actions)` has no I/O and never panics.
//! The run loop feeds it signals and carries out the actions it returns.
//!
//! - Terminal statuses ignore every signal
//! - A signal that makes no sense for the current status fails the run
//! - Stall accounting happens in [`StallDetector`](crate::StallDetector); the
//!   machine only reacts to its verdicts

use ensemble_core::RunStatus;

use crate::stall::StallVerdict;

/// Machine state: the status plus the round bookkeeping the limits need
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub status: RunStatus,
    pub rounds: usize,
    pub round_limit: usize,
}

impl State {
    pub fn new(round_limit: usize) -> Self {
        Self {
            status: RunStatus::Planning,
            rounds: 0,
            round_limit,
        }
    }

    fn with_status(self, status: RunStatus) -> Self {
        Self { status, ..self }
    }

    fn limit_reached(&self) -> bool {
        self.rounds >= self.round_limit
    }
}

/// Inputs to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// Participants registered and config valid
    Start,
    /// A round was recorded
    RoundFinished { verdict: StallVerdict, complete: bool },
    /// The reset policy produced a new context
    ResetApplied,
    /// Final synthesis produced a result
    Synthesized,
    Cancel { reason: String },
    Fail { reason: String },
}

/// Side effects for the run loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    DispatchRound,
    AnnounceStall { stall_count: usize },
    ApplyReset,
    Synthesize,
    /// Publish the terminal event for `status`
    Finish { status: RunStatus, reason: String },
}

fn finish(state: State, status: RunStatus, reason: String) -> (State, Vec<Action>) {
    (state.with_status(status), vec![Action::Finish { status, reason }])
}

fn round_limit_reason(state: &State) -> String {
    format!("round limit of {} reached without a result", state.round_limit)
}

/// Pure transition function
pub fn transition(state: State, signal: Signal) -> (State, Vec<Action>) {
    use RunStatus::*;

    if state.status.is_terminal() {
        return (state, vec![]);
    }

    match (state.status, signal) {
        (_, Signal::Cancel { reason }) => finish(state, Cancelled, reason),
        (_, Signal::Fail { reason }) => finish(state, Failed, reason),

        (Planning, Signal::Start) => (state.with_status(Running), vec![Action::DispatchRound]),

        (Running | Stalled, Signal::RoundFinished { verdict, complete }) => {
            let state = State {
                rounds: state.rounds + 1,
                ..state
            };
            match verdict {
                StallVerdict::Progressed if complete => {
                    (state.with_status(Running), vec![Action::Synthesize])
                }
                StallVerdict::Progressed => {
                    let state = state.with_status(Running);
                    if state.limit_reached() {
                        let reason = round_limit_reason(&state);
                        finish(state, Exhausted, reason)
                    } else {
                        (state, vec![Action::DispatchRound])
                    }
                }
                StallVerdict::Stalled { stall_count } => {
                    let state = state.with_status(Stalled);
                    let announce = Action::AnnounceStall { stall_count };
                    if state.limit_reached() {
                        let reason = round_limit_reason(&state);
                        (
                            state.with_status(Exhausted),
                            vec![announce, Action::Finish { status: Exhausted, reason }],
                        )
                    } else {
                        (state, vec![announce, Action::DispatchRound])
                    }
                }
                // No reset once no round is left to use it
                StallVerdict::ResetDue { stall_count } if state.limit_reached() => {
                    let reason = round_limit_reason(&state);
                    (
                        state.with_status(Exhausted),
                        vec![
                            Action::AnnounceStall { stall_count },
                            Action::Finish {
                                status: Exhausted,
                                reason,
                            },
                        ],
                    )
                }
                StallVerdict::ResetDue { stall_count } => (
                    state.with_status(Resetting),
                    vec![Action::AnnounceStall { stall_count }, Action::ApplyReset],
                ),
                StallVerdict::Exhausted {
                    stall_count,
                    reset_count,
                } => {
                    let reason = format!(
                        "no progress for {} consecutive rounds after {} resets",
                        stall_count, reset_count
                    );
                    (
                        state.with_status(Exhausted),
                        vec![
                            Action::AnnounceStall { stall_count },
                            Action::Finish {
                                status: Exhausted,
                                reason,
                            },
                        ],
                    )
                }
            }
        }

        (Resetting, Signal::ResetApplied) => {
            (state.with_status(Running), vec![Action::DispatchRound])
        }

        (Running, Signal::Synthesized) => finish(state, Succeeded, String::new()),

        (status, signal) => finish(
            state,
            Failed,
            format!("invalid transition: {} cannot handle {:?}", status, signal),
        ),
    }
}
