//! Prompt builders for rounds and the final synthesis
//!
//! A round prompt gives the selected participant:
//! - The task and its own focus for this round
//! - The ledger from the last reset, if any
//! - Older rounds of the current context as one-line summaries
//! - The most recent `horizon` rounds verbatim

use ensemble_agent::CompletionPromise;
use ensemble_core::{ParticipantInfo, Round, Task};

use crate::text::one_line;

const SUMMARY_LINE_CHARS: usize = 120;

/// Inputs for one round prompt
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub task: &'a Task,
    pub participant: &'a ParticipantInfo,
    pub focus: Option<&'a str>,
    /// Rounds since the last reset
    pub rounds: &'a [Round],
    pub ledger: Option<&'a str>,
    pub horizon: usize,
    /// Index of the round being prompted
    pub round_index: usize,
    pub round_limit: usize,
}

fn push_round_summary(prompt: &mut String, round: &Round) {
    for turn in &round.turns {
        let marker = if turn.progressed { "+" } else { "-" };
        prompt.push_str(&format!(
            "- [{}] round {} ({}): {}\n",
            marker,
            round.index + 1,
            turn.participant,
            one_line(&turn.text(), SUMMARY_LINE_CHARS)
        ));
    }
}

fn push_round_verbatim(prompt: &mut String, round: &Round) {
    prompt.push_str(&format!("### Round {}\n\n", round.index + 1));
    for turn in &round.turns {
        prompt.push_str(&format!("**{}**", turn.participant));
        if let Some(focus) = &turn.focus {
            prompt.push_str(&format!(" (focus: {})", focus));
        }
        prompt.push_str(":\n\n");
        prompt.push_str(turn.text().trim());
        prompt.push_str("\n\n");
    }
}

/// Build the prompt for one participant's turn
pub fn build_round_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = String::new();

    prompt.push_str(&format!(
        "# ENSEMBLE - Round {} of {}\n\n",
        ctx.round_index + 1,
        ctx.round_limit
    ));
    prompt.push_str(&format!(
        "You are **{}**: {}\n\n",
        ctx.participant.key, ctx.participant.description
    ));

    prompt.push_str("## TASK\n\n");
    prompt.push_str(ctx.task.description.trim());
    prompt.push_str("\n\n");

    if let Some(focus) = ctx.focus {
        prompt.push_str("## YOUR FOCUS\n\n");
        prompt.push_str(focus);
        prompt.push_str("\n\n");
    }

    if let Some(ledger) = ctx.ledger {
        prompt.push_str("## LEDGER\n\n");
        prompt.push_str(ledger.trim());
        prompt.push_str("\n\n");
    }

    if !ctx.rounds.is_empty() {
        let split = ctx.rounds.len().saturating_sub(ctx.horizon.max(1));
        let (older, recent) = ctx.rounds.split_at(split);

        if !older.is_empty() {
            prompt.push_str("## EARLIER ROUNDS\n\n");
            for round in older {
                push_round_summary(&mut prompt, round);
            }
            prompt.push('\n');
        }

        prompt.push_str("## RECENT ROUNDS\n\n");
        for round in recent {
            push_round_verbatim(&mut prompt, round);
        }
    }

    prompt.push_str("## OBJECTIVE\n\n");
    prompt.push_str("1. Move the task forward with your specialty; do not repeat earlier answers\n");
    prompt.push_str("2. If you are blocked, open a sentence with \"Blocked on\" and name what you need\n");
    prompt.push_str(&format!(
        "3. If the whole task is done, end with {}\n",
        CompletionPromise::marker()
    ));

    prompt
}

/// Prompt for the designated synthesizer
pub fn build_synthesis_prompt(task: &Task, rounds: &[Round]) -> String {
    let mut prompt = String::new();

    prompt.push_str("# ENSEMBLE - Final Synthesis\n\n");
    prompt.push_str("## TASK\n\n");
    prompt.push_str(task.description.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## CONTRIBUTIONS\n\n");
    for round in rounds {
        for turn in round.turns.iter().filter(|t| t.progressed) {
            prompt.push_str(&format!(
                "### Round {} - {}\n\n{}\n\n",
                round.index + 1,
                turn.participant,
                turn.text().trim()
            ));
        }
    }

    prompt.push_str("## OBJECTIVE\n\n");
    prompt.push_str(
        "Consolidate the contributions into one final result for the task. \
         Keep concrete outcomes, drop repetition and process chatter.\n",
    );

    prompt
}

/// Internal summary used when no synthesizer is designated
pub fn summarize_rounds(task: &Task, rounds: &[Round]) -> String {
    let mut summary = format!("# Result: {}\n\n", task.title());

    for round in rounds {
        for turn in round.turns.iter().filter(|t| t.progressed) {
            let text = turn.text().replace(&CompletionPromise::marker(), "");
            summary.push_str(&format!(
                "## {} (round {})\n\n{}\n\n",
                turn.participant,
                round.index + 1,
                text.trim()
            ));
        }
    }

    summary.trim_end().to_string()
}
