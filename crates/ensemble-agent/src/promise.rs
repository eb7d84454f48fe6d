//! Completion promise parsing
//!
//! A worker signals that the whole task is satisfied with a promise marker:
//!
//! ```xml
//! <promise>COMPLETE</promise>
//! <completion_reasoning>
//! Registration, login and tests are in place.
//! Confidence: 90%
//! </completion_reasoning>
//! ```
//!
//! The reasoning block is optional.

use serde::{Deserialize, Serialize};

const PROMISE_OPEN: &str = "<promise>";
const PROMISE_CLOSE: &str = "</promise>";

/// Completion promise parsed from a response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionPromise {
    pub is_complete: bool,
    pub reasoning: Option<String>,
    /// Confidence in 0.0-1.0, taken from the reasoning block
    pub confidence: Option<f32>,
}

impl CompletionPromise {
    /// Parse a response. Anything other than a `COMPLETE` promise yields the
    /// default (incomplete) value.
    ///
    /// ```
    /// use ensemble_agent::CompletionPromise;
    ///
    /// let promise = CompletionPromise::parse("Done.\n<promise>COMPLETE</promise>");
    /// assert!(promise.is_complete);
    /// ```
    pub fn parse(output: &str) -> Self {
        let complete = tag_content(output, PROMISE_OPEN, PROMISE_CLOSE)
            .map(|content| content.eq_ignore_ascii_case("COMPLETE"))
            .unwrap_or(false);
        if !complete {
            return Self::default();
        }

        let reasoning = tag_content(output, "<completion_reasoning>", "</completion_reasoning>")
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        let confidence = reasoning.as_deref().and_then(extract_confidence);

        Self {
            is_complete: true,
            reasoning,
            confidence,
        }
    }

    /// Shorthand for `parse(output).is_complete`
    pub fn signals_completion(output: &str) -> bool {
        Self::parse(output).is_complete
    }

    /// The marker workers are asked to emit
    pub fn marker() -> String {
        format!("{}COMPLETE{}", PROMISE_OPEN, PROMISE_CLOSE)
    }
}

fn tag_content<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = start + text[start..].find(close)?;
    Some(text[start..end].trim())
}

/// "Confidence: 95%" or "95% confident"
fn extract_confidence(reasoning: &str) -> Option<f32> {
    if let Some(start) = reasoning.find("Confidence:") {
        return parse_percentage(&reasoning[start + "Confidence:".len()..]);
    }

    let pos = reasoning.find("% confident")?;
    let before = &reasoning[..pos];
    let num_start = before.rfind(char::is_whitespace).map(|i| i + 1).unwrap_or(0);
    parse_percentage(&before[num_start..])
}

fn parse_percentage(text: &str) -> Option<f32> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f32 = digits.parse().ok()?;
    Some(if value > 1.0 { value / 100.0 } else { value })
}
