//! Core type definitions for Ensemble runs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::WorkerError;

/// The coarse task a team works on. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            created_at: Utc::now(),
        }
    }

    /// First line of the description, for headers and log lines
    pub fn title(&self) -> &str {
        self.description
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("")
    }
}

/// A complete response from a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Participant key (or "orchestrator") that authored the text
    pub author: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    /// First line of the text, truncated to `max_chars`
    pub fn preview(&self, max_chars: usize) -> String {
        let line = self.text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        if line.chars().count() <= max_chars {
            line.to_string()
        } else {
            let cut: String = line.chars().take(max_chars).collect();
            format!("{}...", cut)
        }
    }
}

/// What the core knows about a participant: its key and what it is good at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    /// Unique key within a run (e.g. "developer")
    pub key: String,
    /// Capability description used for selection
    pub description: String,
}

impl ParticipantInfo {
    pub fn new(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
        }
    }
}

/// Run lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planning,
    Running,
    Stalled,
    Resetting,
    Succeeded,
    Exhausted,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Exhausted | Self::Failed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Running => write!(f, "running"),
            Self::Stalled => write!(f, "stalled"),
            Self::Resetting => write!(f, "resetting"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a single participant call ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Responded(Message),
    Failed(WorkerError),
}

/// One participant's call within a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub participant: String,
    /// Subtask the participant was pointed at, if the selection policy chose one
    pub focus: Option<String>,
    pub prompt: String,
    pub outcome: TurnOutcome,
    pub progressed: bool,
    /// Response carried a completion promise
    pub complete: bool,
}

impl Turn {
    pub fn response(&self) -> Option<&Message> {
        match &self.outcome {
            TurnOutcome::Responded(message) => Some(message),
            TurnOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&WorkerError> {
        match &self.outcome {
            TurnOutcome::Responded(_) => None,
            TurnOutcome::Failed(err) => Some(err),
        }
    }

    /// Response text, or the error text for a failed call
    pub fn text(&self) -> String {
        match &self.outcome {
            TurnOutcome::Responded(message) => message.text.clone(),
            TurnOutcome::Failed(err) => format!("error: {}", err),
        }
    }
}

/// One dispatch-and-collect cycle. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub index: usize,
    pub turns: Vec<Turn>,
    pub progressed: bool,
    pub timestamp: DateTime<Utc>,
}

impl Round {
    pub fn new(index: usize, turns: Vec<Turn>) -> Self {
        let progressed = turns.iter().any(|t| t.progressed);
        Self {
            index,
            turns,
            progressed,
            timestamp: Utc::now(),
        }
    }

    pub fn selected_participants(&self) -> impl Iterator<Item = &str> {
        self.turns.iter().map(|t| t.participant.as_str())
    }

    /// Most recent successful response text in this round
    pub fn latest_response(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find_map(|t| t.response().map(|m| m.text.as_str()))
    }

    /// A round satisfies the task when it progressed and some progressed turn
    /// carried a completion promise
    pub fn is_complete(&self) -> bool {
        self.progressed && self.turns.iter().any(|t| t.progressed && t.complete)
    }
}

/// Kinds of orchestrator narration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Plan,
    Instruction,
    Progress,
    Stall,
    Reset,
    Notice,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::Instruction => write!(f, "instruction"),
            Self::Progress => write!(f, "progress"),
            Self::Stall => write!(f, "stall"),
            Self::Reset => write!(f, "reset"),
            Self::Notice => write!(f, "notice"),
        }
    }
}

/// Lifecycle event published on the event bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    OrchestratorMessage {
        round: Option<usize>,
        kind: MessageKind,
        text: String,
    },
    AgentDelta {
        round: usize,
        participant: String,
        chunk: String,
    },
    AgentMessage {
        round: usize,
        participant: String,
        message: Message,
    },
    FinalResult {
        message: Message,
    },
    /// Terminal failure; `status` is `Failed` or `Exhausted`
    Failure {
        status: RunStatus,
        reason: String,
        rounds: usize,
    },
    Cancelled {
        reason: String,
        rounds: usize,
    },
}

impl Event {
    pub fn notice(round: Option<usize>, kind: MessageKind, text: impl Into<String>) -> Self {
        Self::OrchestratorMessage {
            round,
            kind,
            text: text.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::FinalResult { .. } | Self::Failure { .. } | Self::Cancelled { .. }
        )
    }

    pub fn is_delta(&self) -> bool {
        matches!(self, Self::AgentDelta { .. })
    }

    pub fn participant(&self) -> Option<&str> {
        match self {
            Self::AgentDelta { participant, .. } | Self::AgentMessage { participant, .. } => {
                Some(participant)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(participant: &str, text: &str, progressed: bool, complete: bool) -> Turn {
        Turn {
            participant: participant.to_string(),
            focus: None,
            prompt: String::new(),
            outcome: TurnOutcome::Responded(Message::new(participant, text)),
            progressed,
            complete,
        }
    }

    #[test]
    fn test_task_title_skips_blank_lines() {
        let task = Task::new("\n\n  Build auth\n1. Developer: write it");
        assert_eq!(task.title(), "Build auth");
    }

    #[test]
    fn test_message_preview_truncates() {
        let msg = Message::new("developer", "abcdefghij\nsecond line");
        assert_eq!(msg.preview(4), "abcd...");
        assert_eq!(msg.preview(20), "abcdefghij");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Exhausted.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Planning.is_terminal());
        assert!(!RunStatus::Stalled.is_terminal());
        assert!(!RunStatus::Resetting.is_terminal());
    }

    #[test]
    fn test_round_progress_and_completion() {
        let round = Round::new(
            0,
            vec![
                turn("developer", "wrote it", true, false),
                turn("qa", "<promise>COMPLETE</promise>", false, true),
            ],
        );
        assert!(round.progressed);
        // Completion only counts on a progressed turn
        assert!(!round.is_complete());

        let round = Round::new(1, vec![turn("qa", "done", true, true)]);
        assert!(round.is_complete());
        assert_eq!(round.selected_participants().collect::<Vec<_>>(), vec!["qa"]);
    }

    #[test]
    fn test_latest_response_skips_failures() {
        let failed = Turn {
            participant: "devops".into(),
            focus: None,
            prompt: String::new(),
            outcome: TurnOutcome::Failed(WorkerError::Busy),
            progressed: false,
            complete: false,
        };
        let round = Round::new(0, vec![turn("developer", "first", true, false), failed]);
        assert_eq!(round.latest_response(), Some("first"));
        assert_eq!(round.turns[1].text(), "error: worker is busy with another call");
    }

    #[test]
    fn test_event_classification() {
        let delta = Event::AgentDelta {
            round: 0,
            participant: "qa".into(),
            chunk: "x".into(),
        };
        assert!(delta.is_delta());
        assert_eq!(delta.participant(), Some("qa"));
        assert!(!delta.is_terminal());

        let cancelled = Event::Cancelled {
            reason: "user".into(),
            rounds: 2,
        };
        assert!(cancelled.is_terminal());
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = Event::notice(Some(3), MessageKind::Stall, "no progress");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "orchestrator_message");
        assert_eq!(json["kind"], "stall");
        assert_eq!(json["round"], 3);
    }
}
