//! Text normalization shared by the selection and progress policies

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "are", "was", "were", "has", "have", "had",
    "not", "but", "you", "your", "our", "its", "all", "any", "can", "will", "into", "from",
    "then", "than", "them", "they", "also", "some", "such", "each", "more", "out",
];

fn list_item() -> &'static Regex {
    static LIST_ITEM: OnceLock<Regex> = OnceLock::new();
    LIST_ITEM.get_or_init(|| {
        Regex::new(r"^\s*(?:\d+[.)]|[-*•])\s+(.+)$").expect("list item pattern is valid")
    })
}

fn sentence_end() -> &'static Regex {
    static SENTENCE_END: OnceLock<Regex> = OnceLock::new();
    SENTENCE_END
        .get_or_init(|| Regex::new(r"[.!?;]+(?:\s+|$)").expect("sentence pattern is valid"))
}

/// Lowercased alphanumeric words of three or more characters, minus stop words
pub fn normalized_words(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Word-set Jaccard similarity in [0, 1]. Two empty texts are identical.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = normalized_words(a);
    let b = normalized_words(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(&b).count();
    let total = a.union(&b).count();
    shared as f64 / total as f64
}

/// Split a task into subtasks: list items if the task has any, otherwise
/// sentences. Falls back to the whole (trimmed) description.
pub fn subtasks(description: &str) -> Vec<String> {
    let items: Vec<String> = description
        .lines()
        .filter_map(|line| list_item().captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
        .filter(|item| !item.is_empty())
        .collect();
    if !items.is_empty() {
        return items;
    }

    let sentences: Vec<String> = sentence_end()
        .split(description)
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|s| !s.is_empty())
        .collect();
    if !sentences.is_empty() {
        return sentences;
    }

    let whole = description.trim();
    if whole.is_empty() {
        Vec::new()
    } else {
        vec![whole.to_string()]
    }
}

/// First `max_chars` characters of the first non-empty line
pub fn one_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_words() {
        let words = normalized_words("Deploy the Auth-API to staging, and run tests!");
        let expected: BTreeSet<String> = ["deploy", "auth", "api", "staging", "run", "tests"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn test_jaccard() {
        assert_eq!(jaccard("build login page", "build login page"), 1.0);
        assert_eq!(jaccard("", ""), 1.0);
        assert_eq!(jaccard("alpha beta", "gamma delta"), 0.0);
        let half = jaccard("alpha beta gamma", "alpha beta delta");
        assert!((half - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_subtasks_from_numbered_list() {
        let task = "Ship the auth service:\n1. Implement login\n2) Write tests\n- Deploy to staging";
        assert_eq!(
            subtasks(task),
            vec!["Implement login", "Write tests", "Deploy to staging"]
        );
    }

    #[test]
    fn test_subtasks_from_sentences() {
        let task = "Implement user login. Review it for security issues!\nThen deploy";
        assert_eq!(
            subtasks(task),
            vec![
                "Implement user login",
                "Review it for security issues",
                "Then deploy"
            ]
        );
    }

    #[test]
    fn test_subtasks_of_empty_task() {
        assert!(subtasks("   ").is_empty());
    }

    #[test]
    fn test_one_line() {
        assert_eq!(one_line("\n  first line\nsecond", 80), "first line");
        assert_eq!(one_line("abcdef", 3), "abc...");
    }
}
