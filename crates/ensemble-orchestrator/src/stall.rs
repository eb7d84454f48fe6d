//! Stall detection and context resets
//!
//! [`StallDetector`] counts consecutive rounds without progress and decides,
//! once the count reaches the stall limit, whether a reset is still allowed.
//! A [`ResetPolicy`] turns the history into a compact ledger that replaces the
//! raw transcript in later prompts.

use ensemble_core::{Round, RunConfig, Task};
use serde::Serialize;

use crate::text::one_line;

/// What a round outcome means for the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum StallVerdict {
    Progressed,
    /// Below the stall limit
    Stalled { stall_count: usize },
    /// Stall limit reached with resets left
    ResetDue { stall_count: usize },
    /// Stall limit reached and no resets left
    Exhausted { stall_count: usize, reset_count: usize },
}

/// Consecutive non-progress counter with a bounded reset budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallDetector {
    stall_limit: usize,
    reset_limit: usize,
    stall_count: usize,
    reset_count: usize,
}

impl StallDetector {
    pub fn new(stall_limit: usize, reset_limit: usize) -> Self {
        Self {
            stall_limit: stall_limit.max(1),
            reset_limit,
            stall_count: 0,
            reset_count: 0,
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.stall_limit, config.reset_limit)
    }

    pub fn stall_count(&self) -> usize {
        self.stall_count
    }

    pub fn reset_count(&self) -> usize {
        self.reset_count
    }

    /// Record one round outcome
    pub fn observe(&mut self, progressed: bool) -> StallVerdict {
        if progressed {
            self.stall_count = 0;
            return StallVerdict::Progressed;
        }

        self.stall_count += 1;
        if self.stall_count < self.stall_limit {
            StallVerdict::Stalled {
                stall_count: self.stall_count,
            }
        } else if self.reset_count < self.reset_limit {
            StallVerdict::ResetDue {
                stall_count: self.stall_count,
            }
        } else {
            StallVerdict::Exhausted {
                stall_count: self.stall_count,
                reset_count: self.reset_count,
            }
        }
    }

    /// A reset was carried out
    pub fn reset_applied(&mut self) {
        self.reset_count += 1;
        self.stall_count = 0;
    }
}

/// Builds the working context that replaces the transcript after a reset
pub trait ResetPolicy: Send + Sync {
    fn ledger(&self, task: &Task, rounds: &[Round], stall_count: usize) -> String;
}

/// Default reset: one line per progressed turn plus the stall count
#[derive(Debug, Clone, Copy)]
pub struct LedgerReset {
    line_chars: usize,
}

impl LedgerReset {
    pub fn new(line_chars: usize) -> Self {
        Self {
            line_chars: line_chars.max(16),
        }
    }
}

impl Default for LedgerReset {
    fn default() -> Self {
        Self::new(160)
    }
}

impl ResetPolicy for LedgerReset {
    fn ledger(&self, task: &Task, rounds: &[Round], stall_count: usize) -> String {
        let mut ledger = format!("Task: {}\n", task.title());

        let lines: Vec<String> = rounds
            .iter()
            .flat_map(|r| r.turns.iter().map(move |t| (r.index, t)))
            .filter(|(_, t)| t.progressed)
            .map(|(index, t)| {
                format!(
                    "- round {} ({}): {}",
                    index + 1,
                    t.participant,
                    one_line(&t.text(), self.line_chars)
                )
            })
            .collect();

        if lines.is_empty() {
            ledger.push_str("No progress recorded yet.\n");
        } else {
            ledger.push_str("Progress so far:\n");
            for line in lines {
                ledger.push_str(&line);
                ledger.push('\n');
            }
        }
        ledger.push_str(&format!(
            "The last {} rounds made no progress. Take a different approach.\n",
            stall_count
        ));
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::{Message, Turn, TurnOutcome, WorkerError};

    #[test]
    fn test_stall_count_tracks_consecutive_failures() {
        let mut detector = StallDetector::new(10, 0);
        let outcomes = [false, false, true, false, true, false, false, false];
        let mut counts = Vec::new();
        for progressed in outcomes {
            detector.observe(progressed);
            counts.push(detector.stall_count());
        }
        assert_eq!(counts, vec![1, 2, 0, 1, 0, 1, 2, 3]);
    }

    #[test]
    fn test_reset_due_then_exhausted() {
        let mut detector = StallDetector::new(2, 1);
        assert_eq!(detector.observe(false), StallVerdict::Stalled { stall_count: 1 });
        assert_eq!(detector.observe(false), StallVerdict::ResetDue { stall_count: 2 });
        detector.reset_applied();
        assert_eq!(detector.stall_count(), 0);
        assert_eq!(detector.reset_count(), 1);

        detector.observe(false);
        assert_eq!(
            detector.observe(false),
            StallVerdict::Exhausted {
                stall_count: 2,
                reset_count: 1
            }
        );
    }

    #[test]
    fn test_zero_reset_limit_exhausts_directly() {
        let mut detector = StallDetector::new(1, 0);
        assert!(matches!(
            detector.observe(false),
            StallVerdict::Exhausted { .. }
        ));
    }

    #[test]
    fn test_reset_count_only_moves_on_reset() {
        let mut detector = StallDetector::new(3, 2);
        for _ in 0..2 {
            detector.observe(false);
        }
        detector.observe(true);
        assert_eq!(detector.reset_count(), 0);
    }

    fn turn(participant: &str, outcome: TurnOutcome, progressed: bool) -> Turn {
        Turn {
            participant: participant.into(),
            focus: None,
            prompt: String::new(),
            outcome,
            progressed,
            complete: false,
        }
    }

    #[test]
    fn test_ledger_lists_progressed_turns_only() {
        let task = Task::new("Ship login\nwith tests");
        let rounds = vec![
            Round::new(
                0,
                vec![turn(
                    "developer",
                    TurnOutcome::Responded(Message::new("developer", "Login endpoint done\nmore")),
                    true,
                )],
            ),
            Round::new(
                1,
                vec![turn(
                    "qa",
                    TurnOutcome::Failed(WorkerError::Unavailable("down".into())),
                    false,
                )],
            ),
        ];

        let ledger = LedgerReset::default().ledger(&task, &rounds, 2);
        assert_eq!(
            ledger,
            "Task: Ship login\n\
             Progress so far:\n\
             - round 1 (developer): Login endpoint done\n\
             The last 2 rounds made no progress. Take a different approach.\n"
        );
    }

    #[test]
    fn test_ledger_without_progress() {
        let ledger = LedgerReset::default().ledger(&Task::new("x"), &[], 4);
        assert!(ledger.contains("No progress recorded yet."));
        assert!(ledger.contains("The last 4 rounds"));
    }
}
