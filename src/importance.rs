//! Heuristic auto-importance scoring.
//!
//! Combines four weighted signals — keywords, specificity, structure, and
//! length — into a single importance score in `[0, 1]`. Pure functions, no
//! model inference.

use once_cell::sync::Lazy;
use regex::Regex;

const WEIGHT_LENGTH: f64 = 0.15;
const WEIGHT_KEYWORDS: f64 = 0.35;
const WEIGHT_STRUCTURE: f64 = 0.20;
const WEIGHT_SPECIFICITY: f64 = 0.30;

/// Keywords that push importance up when present in the text.
const BOOSTER_KEYWORDS: &[&str] = &[
    "decision",
    "architecture",
    "critical",
    "important",
    "always",
    "never",
    "bug",
    "fix",
    "security",
    "preference",
    "convention",
    "principle",
    "requirement",
    "breaking",
    "migration",
    "production",
    "deploy",
    "secret",
    "password",
    "credential",
    "root cause",
    "vulnerability",
    "performance",
    "deadline",
];

/// Tentative words that pull importance down.
const REDUCER_KEYWORDS: &[&str] = &[
    "test",
    "trying",
    "maybe",
    "perhaps",
    "temporary",
    "todo",
    "wip",
    "experiment",
    "draft",
    "scratch",
    "placeholder",
    "stub",
    "mock",
    "hack",
    "workaround",
    "temp",
    "fixme",
];

static CODE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"`[^`]+`",          // inline code
        r"```",              // fenced code block
        r"def\s+\w+\(",      // function definition
        r"class\s+\w+[:(]",  // class definition
        r"import\s+\w+",     // import statement
        r"\w+\.\w+\(",       // method call
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

static SPECIFICITY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"[\w/\\]+\.\w{1,4}\b",                // file paths (src/foo.rs)
        r"v?\d+\.\d+(?:\.\d+)?",               // version numbers
        r"https?://\S+",                       // URLs
        r"(?:^|[^.a-z])([A-Z][a-z]+(?:[A-Z][a-z]+)+)", // CamelCase names
        r"\b[A-Z]{2,}\b",                      // UPPERCASE acronyms
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static regex"))
    .collect()
});

/// Length signal: very short texts score low, longer detailed texts level off.
fn length_signal(text: &str) -> f64 {
    match text.chars().count() {
        n if n < 20 => 0.2,
        n if n < 50 => 0.4,
        n if n < 200 => 0.5,
        n if n < 500 => 0.7,
        _ => 0.8,
    }
}

/// Keyword signal: neutral 0.5 baseline, each booster adds 0.08, each
/// reducer subtracts 0.06.
fn keyword_signal(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let boosts = BOOSTER_KEYWORDS.iter().filter(|k| lower.contains(**k)).count();
    let reductions = REDUCER_KEYWORDS.iter().filter(|k| lower.contains(**k)).count();
    (0.5 + boosts as f64 * 0.08 - reductions as f64 * 0.06).clamp(0.0, 1.0)
}

/// Structure signal: code markers suggest concrete, actionable content.
fn structure_signal(text: &str) -> f64 {
    let matches = CODE_PATTERNS.iter().filter(|p| p.is_match(text)).count();
    match matches {
        0 => 0.4,
        1 => 0.6,
        2 | 3 => 0.75,
        _ => 0.9,
    }
}

/// Specificity signal: file paths, versions, URLs, and proper nouns.
fn specificity_signal(text: &str) -> f64 {
    let matches: usize = SPECIFICITY_PATTERNS
        .iter()
        .map(|p| p.find_iter(text).count())
        .sum();
    match matches {
        0 => 0.3,
        1 | 2 => 0.55,
        3..=5 => 0.7,
        _ => 0.9,
    }
}

/// Score the importance of a memory text.
///
/// Returns a value in `[0, 1]`; unremarkable text lands near 0.5.
pub fn score_importance(text: &str) -> f64 {
    let combined = WEIGHT_LENGTH * length_signal(text)
        + WEIGHT_KEYWORDS * keyword_signal(text)
        + WEIGHT_STRUCTURE * structure_signal(text)
        + WEIGHT_SPECIFICITY * specificity_signal(text);
    combined.clamp(0.0, 1.0)
}
