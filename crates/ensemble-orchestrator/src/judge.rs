//! Progress verdicts for individual turns

use ensemble_agent::CompletionPromise;
use regex::Regex;
use std::sync::OnceLock;

use crate::text::{jaccard, normalized_words};

/// A sentence that opens by declaring itself stuck: "I'm blocked on ...",
/// "Still waiting for ...", "We can't proceed", "No progress yet".
/// Mid-sentence mentions ("retry logic waiting for the pool") do not count.
fn blocked_clause() -> &'static Regex {
    static BLOCKED: OnceLock<Regex> = OnceLock::new();
    BLOCKED.get_or_init(|| {
        Regex::new(
            r"(?ix)
            ^[\s\-*>\x22]*
            (?:(?:but|and|so|now)\s+)?
            (?:(?:i|we)(?:\s+am|\s+are|'m|'re)?\s+)?
            (?:(?:still|currently)\s+)?
            (?:
                blocked\b
              | stuck\b
              | waiting\s+(?:for|on)\b
              | (?:cannot|can't|unable\s+to)\s+proceed\b
              | (?:making\s+)?no\s+progress(?:\s+(?:yet|so\s+far|this\s+round))?\s*$
            )",
        )
        .expect("blocked clause pattern is valid")
    })
}

/// How one response moved the task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verdict {
    pub progressed: bool,
    /// The response carries a completion promise
    pub complete: bool,
}

pub trait ProgressJudge: Send + Sync {
    /// Judge `response` against the latest response of the previous round.
    /// Must be deterministic.
    fn judge(&self, response: &str, previous: Option<&str>) -> Verdict;
}

/// Default judge: non-empty, not a near-duplicate of the previous round, not
/// declaring itself blocked
#[derive(Debug, Clone, Copy)]
pub struct SimilarityJudge {
    threshold: f64,
}

impl SimilarityJudge {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn is_blocked(response: &str) -> bool {
        let normalized = response.replace('\u{2019}', "'");
        normalized
            .split(|c| matches!(c, '.' | '!' | '?' | ';' | '\n'))
            .any(|clause| blocked_clause().is_match(clause.trim()))
    }
}

impl Default for SimilarityJudge {
    fn default() -> Self {
        Self::new(0.9)
    }
}

impl ProgressJudge for SimilarityJudge {
    fn judge(&self, response: &str, previous: Option<&str>) -> Verdict {
        let complete = CompletionPromise::signals_completion(response);

        if normalized_words(response).is_empty() && !complete {
            return Verdict {
                progressed: false,
                complete,
            };
        }
        if Self::is_blocked(response) {
            return Verdict {
                progressed: false,
                complete,
            };
        }
        if let Some(previous) = previous {
            if jaccard(response, previous) >= self.threshold {
                return Verdict {
                    progressed: false,
                    complete,
                };
            }
        }

        Verdict {
            progressed: true,
            complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_response_progresses() {
        let verdict = SimilarityJudge::default().judge("Implemented the login endpoint", None);
        assert_eq!(
            verdict,
            Verdict {
                progressed: true,
                complete: false
            }
        );
    }

    #[test]
    fn test_empty_response_does_not_progress() {
        let judge = SimilarityJudge::default();
        assert!(!judge.judge("", None).progressed);
        assert!(!judge.judge("  ok  ", None).progressed);
    }

    #[test]
    fn test_near_duplicate_does_not_progress() {
        let judge = SimilarityJudge::default();
        let previous = "Implemented the login endpoint with password hashing";
        assert!(!judge
            .judge("Implemented the login endpoint, with password hashing.", Some(previous))
            .progressed);
        assert!(judge
            .judge("Added integration tests for the login endpoint", Some(previous))
            .progressed);
    }

    #[test]
    fn test_blocked_response_does_not_progress() {
        let judge = SimilarityJudge::default();
        assert!(!judge.judge("I'm blocked until the schema lands.", None).progressed);
        assert!(!judge.judge("Still waiting on credentials", None).progressed);
    }

    #[test]
    fn test_blocked_statement_in_a_later_sentence() {
        let judge = SimilarityJudge::default();
        assert!(!judge
            .judge("Reviewed the diff. We can't proceed without the API keys.", None)
            .progressed);
        assert!(!judge.judge("Ran the suite.\nNo progress yet", None).progressed);
        assert!(!judge.judge("Schema drafted; but stuck on migrations", None).progressed);
    }

    #[test]
    fn test_incidental_phrases_still_progress() {
        let judge = SimilarityJudge::default();
        assert!(judge
            .judge("Added retry logic waiting for the DB pool", None)
            .progressed);
        assert!(judge.judge("Fixed the no progress bar bug", None).progressed);
        assert!(judge
            .judge("Removed the code path blocked by the old feature flag", None)
            .progressed);
    }

    #[test]
    fn test_completion_promise_is_reported() {
        let verdict = SimilarityJudge::default()
            .judge("All done and tested.\n<promise>COMPLETE</promise>", None);
        assert!(verdict.progressed);
        assert!(verdict.complete);
    }

    #[test]
    fn test_lower_threshold_is_stricter() {
        let judge = SimilarityJudge::new(0.5);
        assert!(!judge
            .judge("alpha beta gamma", Some("alpha beta delta"))
            .progressed);
    }
}
