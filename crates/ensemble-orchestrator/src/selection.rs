//! Who acts next
//!
//! A [`SelectionPolicy`] looks at the task, the registered participants and the
//! rounds so far, and names one participant (or several, for fan-out) for the
//! next round. Policies are pure: the same history always gives the same pick.

use ensemble_core::{ParticipantInfo, Round, Task};
use std::collections::HashSet;

use crate::text::{normalized_words, subtasks};

/// One participant chosen for the next round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub participant: String,
    /// Subtask the participant should concentrate on
    pub focus: Option<String>,
}

impl Selection {
    pub fn new(participant: impl Into<String>, focus: Option<String>) -> Self {
        Self {
            participant: participant.into(),
            focus,
        }
    }
}

pub trait SelectionPolicy: Send + Sync {
    /// Choose participants for round `rounds.len()`
    ///
    /// `participants` is in registration order and never empty. An empty
    /// result is treated as a stalled round.
    fn select(&self, task: &Task, participants: &[ParticipantInfo], rounds: &[Round])
        -> Vec<Selection>;
}

/// Round-robin with relevance
///
/// The task is split into subtasks. A subtask counts as addressed once a
/// progressed turn focused on it. The first unaddressed subtask that shares
/// words with some participant goes to the participant sharing the most
/// (earliest registered on ties). The participant who last tried that subtask
/// without progress steps aside for the next-best match, if there is one, so a
/// stall or a reset changes hands. Otherwise the next participant after the
/// most recently selected one takes the first unaddressed subtask.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevancePolicy;

impl RelevancePolicy {
    fn addressed(rounds: &[Round]) -> HashSet<&str> {
        rounds
            .iter()
            .flat_map(|r| r.turns.iter())
            .filter(|t| t.progressed)
            .filter_map(|t| t.focus.as_deref())
            .collect()
    }

    /// Indices of participants sharing words with `subtask`, best first
    fn ranked_matches(subtask: &str, participants: &[ParticipantInfo]) -> Vec<usize> {
        let wanted = normalized_words(subtask);
        let mut scored: Vec<(usize, usize)> = participants
            .iter()
            .enumerate()
            .map(|(index, participant)| {
                let offered =
                    normalized_words(&format!("{} {}", participant.key, participant.description));
                (index, wanted.intersection(&offered).count())
            })
            .filter(|(_, score)| *score > 0)
            .collect();
        // Stable sort keeps registration order on ties
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.into_iter().map(|(index, _)| index).collect()
    }

    /// Participant of the latest turn focused on `subtask`
    fn last_attempt<'a>(subtask: &str, rounds: &'a [Round]) -> Option<&'a str> {
        rounds
            .iter()
            .rev()
            .flat_map(|r| r.turns.iter().rev())
            .find(|t| t.focus.as_deref() == Some(subtask))
            .map(|t| t.participant.as_str())
    }

    fn best_match(subtask: &str, participants: &[ParticipantInfo], rounds: &[Round]) -> Option<usize> {
        let ranked = Self::ranked_matches(subtask, participants);
        // An open subtask's latest attempt never progressed
        let stuck = Self::last_attempt(subtask, rounds);
        ranked
            .iter()
            .copied()
            .find(|&index| Some(participants[index].key.as_str()) != stuck)
            .or_else(|| ranked.first().copied())
    }

    fn next_in_rotation(participants: &[ParticipantInfo], rounds: &[Round]) -> usize {
        let last = rounds
            .last()
            .and_then(|r| r.turns.last())
            .and_then(|t| participants.iter().position(|p| p.key == t.participant));
        match last {
            Some(index) => (index + 1) % participants.len(),
            None => 0,
        }
    }
}

impl SelectionPolicy for RelevancePolicy {
    fn select(
        &self,
        task: &Task,
        participants: &[ParticipantInfo],
        rounds: &[Round],
    ) -> Vec<Selection> {
        if participants.is_empty() {
            return Vec::new();
        }

        let addressed = Self::addressed(rounds);
        let open: Vec<String> = subtasks(&task.description)
            .into_iter()
            .filter(|s| !addressed.contains(s.as_str()))
            .collect();

        for subtask in &open {
            if let Some(index) = Self::best_match(subtask, participants, rounds) {
                return vec![Selection::new(
                    participants[index].key.clone(),
                    Some(subtask.clone()),
                )];
            }
        }

        let index = Self::next_in_rotation(participants, rounds);
        vec![Selection::new(
            participants[index].key.clone(),
            open.into_iter().next(),
        )]
    }
}

/// Every participant, every round
#[derive(Debug, Clone, Copy, Default)]
pub struct BroadcastPolicy;

impl SelectionPolicy for BroadcastPolicy {
    fn select(
        &self,
        _task: &Task,
        participants: &[ParticipantInfo],
        _rounds: &[Round],
    ) -> Vec<Selection> {
        participants
            .iter()
            .map(|p| Selection::new(p.key.clone(), None))
            .collect()
    }
}
