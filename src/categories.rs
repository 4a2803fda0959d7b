//! Memory categories with automatic scope routing and categorization.
//!
//! Nine categories, each with a fixed scope routing rule, plus two
//! heuristics: [`auto_categorize`] picks the best category for a text, and
//! [`infer_scope`] decides project-vs-global from the text's subject when
//! neither scope nor category was supplied.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

use crate::error::MeshError;
use crate::memory::Scope;

/// The nine recognised memory categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Preference,
    Guardrail,
    Mistake,
    Personality,
    Question,
    Decision,
    Pattern,
    Context,
    SessionSummary,
}

/// All categories, in routing-table order.
pub const ALL_CATEGORIES: [Category; 9] = [
    Category::Preference,
    Category::Guardrail,
    Category::Mistake,
    Category::Personality,
    Category::Question,
    Category::Decision,
    Category::Pattern,
    Category::Context,
    Category::SessionSummary,
];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preference => "preference",
            Self::Guardrail => "guardrail",
            Self::Mistake => "mistake",
            Self::Personality => "personality",
            Self::Question => "question",
            Self::Decision => "decision",
            Self::Pattern => "pattern",
            Self::Context => "context",
            Self::SessionSummary => "session_summary",
        }
    }

    /// The fixed scope this category routes to.
    pub fn scope(&self) -> Scope {
        match self {
            Self::Preference
            | Self::Guardrail
            | Self::Mistake
            | Self::Personality
            | Self::Question => Scope::Global,
            Self::Decision | Self::Pattern | Self::Context | Self::SessionSummary => {
                Scope::Project
            }
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference" => Ok(Self::Preference),
            "guardrail" => Ok(Self::Guardrail),
            "mistake" => Ok(Self::Mistake),
            "personality" => Ok(Self::Personality),
            "question" => Ok(Self::Question),
            "decision" => Ok(Self::Decision),
            "pattern" => Ok(Self::Pattern),
            "context" => Ok(Self::Context),
            "session_summary" => Ok(Self::SessionSummary),
            other => Err(MeshError::invalid(format!(
                "invalid category {other:?}; expected one of: preference, guardrail, \
                 mistake, personality, question, decision, pattern, context, session_summary"
            ))),
        }
    }
}

fn ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static regex")
}

// Patterns are tried in order; the first category with a match wins, so
// narrow categories are listed before broad ones.
static CATEGORY_PATTERNS: Lazy<Vec<(Category, Vec<Regex>)>> = Lazy::new(|| {
    vec![
        (
            Category::Guardrail,
            vec![
                ci(r"\bnever\b"),
                ci(r"\bdon'?t\b"),
                ci(r"\bmust not\b"),
                ci(r"\bavoid\b"),
                ci(r"\bdo not\b"),
                ci(r"\bforbid"),
                ci(r"\bprohibit"),
                ci(r"\brule:\s"),
            ],
        ),
        (
            Category::Mistake,
            vec![
                ci(r"\bmistake\b"),
                ci(r"\bbug\b"),
                ci(r"\bbroke\b"),
                ci(r"\bforgot\b"),
                ci(r"\bshould have\b"),
                ci(r"\blesson\b"),
                ci(r"\blearned\b"),
                ci(r"\bregret\b"),
                ci(r"\baccident"),
            ],
        ),
        (
            Category::Personality,
            vec![
                ci(r"\bI am\b"),
                ci(r"\bI work\b"),
                ci(r"\bmy role\b"),
                ci(r"\bsenior\b"),
                ci(r"\bjunior\b"),
                ci(r"\bmy background\b"),
                ci(r"\byears? of experience\b"),
                ci(r"\bmy name\b"),
            ],
        ),
        (
            Category::Preference,
            vec![
                ci(r"\bprefer\b"),
                ci(r"\balways use\b"),
                ci(r"\blike to\b"),
                ci(r"\bstyle\b"),
                ci(r"\bfavou?rite\b"),
                ci(r"\bdefault to\b"),
            ],
        ),
        (
            Category::Question,
            vec![
                ci(r"\bwhy\b.*\?"),
                ci(r"\bhow\b.*\?"),
                ci(r"\bwhat if\b"),
                ci(r"\bconcern\b"),
                ci(r"\bwonder\b"),
                ci(r"\bcurious\b"),
            ],
        ),
        (
            Category::Decision,
            vec![
                ci(r"\bdecided\b"),
                ci(r"\bchose\b"),
                ci(r"\bpicked\b"),
                ci(r"\bapproach\b"),
                ci(r"\barchitecture\b"),
                ci(r"\bwent with\b"),
                ci(r"\bselected\b"),
            ],
        ),
        (
            Category::Pattern,
            vec![
                ci(r"\bconvention\b"),
                ci(r"\bpattern\b"),
                ci(r"\bstyle guide\b"),
                ci(r"\balways do\b"),
                ci(r"\bcoding standard\b"),
                ci(r"\bbest practice\b"),
            ],
        ),
        (
            Category::SessionSummary,
            vec![
                ci(r"\bsession summary\b"),
                ci(r"\bsummary of\b.*\bsession\b"),
                ci(r"\bwhat we did\b"),
                ci(r"\baccomplished\b"),
            ],
        ),
    ]
});

// Patterns whose subject is the user (routes to the global store).
static USER_SUBJECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        ci(r"\buser prefers?\b"),
        ci(r"\buser likes?\b"),
        ci(r"\buser wants?\b"),
        ci(r"\buser hates?\b"),
        ci(r"\buser always\b"),
        ci(r"\buser never\b"),
        ci(r"\buser['\u{2019}]s\b"),
        ci(r"\b[A-Z][a-z]+['\u{2019}]s (?:pattern|workflow|habit|style|preference)"),
        ci(r"\bacross all projects?\b"),
        ci(r"\bin every project\b"),
        ci(r"\bglobal preference\b"),
        ci(r"\bglobal setting\b"),
        ci(r"\binteraction pattern"),
        ci(r"\bcommunication style\b"),
        ci(r"\bcoding style\b"),
        ci(r"\bworkflow preference\b"),
        ci(r"\bpersonal preference\b"),
    ]
});

// Patterns whose subject is the project (routes to the project store).
static PROJECT_SUBJECT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\bsrc/").unwrap(),
        Regex::new(r"\btests?/").unwrap(),
        Regex::new(r"\b\w+\.py\b").unwrap(),
        Regex::new(r"\b\w+\.ts\b").unwrap(),
        Regex::new(r"\b\w+\.js\b").unwrap(),
        Regex::new(r"\b\w+\.go\b").unwrap(),
        Regex::new(r"\b\w+\.rs\b").unwrap(),
        Regex::new(r"\bpyproject\.toml\b").unwrap(),
        Regex::new(r"\bpackage\.json\b").unwrap(),
        Regex::new(r"\bCargo\.toml\b").unwrap(),
        Regex::new(r"\bgo\.mod\b").unwrap(),
        Regex::new(r"\bCLAUDE\.md\b").unwrap(),
        Regex::new(r"\bAGENTS\.md\b").unwrap(),
        ci(r"\bimplementation state\b"),
        ci(r"\bimplemented\b.*\b\d{4}-\d{2}-\d{2}\b"),
        Regex::new(r"\bv\d+\.\d+\.\d+\b.*\b\d{4}-\d{2}-\d{2}\b").unwrap(),
        ci(r"\btests? pass"),
        ci(r"\bcommit\b.*\b[0-9a-f]{7,}\b"),
    ]
});

/// Detect the most likely category for a piece of text.
///
/// Falls back to [`Category::Context`] when nothing specific matches.
pub fn auto_categorize(text: &str) -> Category {
    for (category, patterns) in CATEGORY_PATTERNS.iter() {
        if patterns.iter().any(|p| p.is_match(text)) {
            return *category;
        }
    }
    Category::Context
}

/// Infer scope from the subject of the text.
///
/// User-focused text (habits, preferences, personality) routes to the global
/// store; project-focused text (file paths, implementation state) routes to
/// the project store. Returns `None` when no strong signal is found, meaning
/// the caller should keep whatever scope it already has.
pub fn infer_scope(text: &str, project_name: Option<&str>) -> Option<Scope> {
    let user_score = USER_SUBJECT_PATTERNS
        .iter()
        .filter(|p| p.is_match(text))
        .count();
    let mut project_score = PROJECT_SUBJECT_PATTERNS
        .iter()
        .filter(|p| p.is_match(text))
        .count();

    // A mention of the project's own name is a strong signal.
    if let Some(name) = project_name {
        if name.len() >= 3 {
            let pat = RegexBuilder::new(&format!(r"\b{}\b", regex::escape(name)))
                .case_insensitive(true)
                .build();
            if let Ok(pat) = pat {
                if pat.is_match(text) {
                    project_score += 2;
                }
            }
        }
    }

    if user_score > 0 && user_score > project_score {
        return Some(Scope::Global);
    }
    if project_score > 0 && project_score > user_score {
        return Some(Scope::Project);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_scope_routing_table() {
        assert_eq!(Category::Preference.scope(), Scope::Global);
        assert_eq!(Category::Guardrail.scope(), Scope::Global);
        assert_eq!(Category::Mistake.scope(), Scope::Global);
        assert_eq!(Category::Personality.scope(), Scope::Global);
        assert_eq!(Category::Question.scope(), Scope::Global);
        assert_eq!(Category::Decision.scope(), Scope::Project);
        assert_eq!(Category::Pattern.scope(), Scope::Project);
        assert_eq!(Category::Context.scope(), Scope::Project);
        assert_eq!(Category::SessionSummary.scope(), Scope::Project);
    }

    #[test]
    fn category_string_roundtrip() {
        for cat in ALL_CATEGORIES {
            assert_eq!(cat.as_str().parse::<Category>().unwrap(), cat);
        }
        assert!("nonsense".parse::<Category>().is_err());
    }

    #[test]
    fn guardrails_win_over_preferences() {
        // "Never" matches guardrail before "prefer" is considered.
        assert_eq!(auto_categorize("Never use force push, I prefer rebasing"), Category::Guardrail);
    }

    #[test]
    fn categorize_examples() {
        assert_eq!(auto_categorize("I prefer tabs over spaces"), Category::Preference);
        assert_eq!(auto_categorize("Fixed the bug where sessions leaked"), Category::Mistake);
        assert_eq!(auto_categorize("I am a senior backend engineer"), Category::Personality);
        assert_eq!(auto_categorize("Why does the cache invalidate early?"), Category::Question);
        assert_eq!(auto_categorize("We chose Kafka for event streaming"), Category::Decision);
        assert_eq!(
            auto_categorize("Session summary: refactored the parser"),
            Category::SessionSummary
        );
        assert_eq!(auto_categorize("The sky was blue today"), Category::Context);
    }

    #[test]
    fn infer_scope_user_subject() {
        assert_eq!(
            infer_scope("User prefers short answers across all projects", None),
            Some(Scope::Global)
        );
        assert_eq!(
            infer_scope("Maria's workflow: review diffs before committing", None),
            Some(Scope::Global)
        );
    }

    #[test]
    fn infer_scope_project_subject() {
        assert_eq!(
            infer_scope("The retry logic lives in src/client.rs behind a feature flag", None),
            Some(Scope::Project)
        );
        assert_eq!(
            infer_scope("package.json pins node to 20.x", None),
            Some(Scope::Project)
        );
    }

    #[test]
    fn infer_scope_project_name_is_strong_signal() {
        assert_eq!(
            infer_scope("frobnicator needs a cache layer", Some("frobnicator")),
            Some(Scope::Project)
        );
        // Short names are ignored to avoid false positives.
        assert_eq!(infer_scope("ab needs a cache layer", Some("ab")), None);
    }

    #[test]
    fn infer_scope_no_signal_returns_none() {
        assert_eq!(infer_scope("remember the milk", None), None);
    }

    #[test]
    fn infer_scope_is_deterministic() {
        let text = "User prefers Python but the fix went into src/main.rs";
        let first = infer_scope(text, None);
        for _ in 0..5 {
            assert_eq!(infer_scope(text, None), first);
        }
    }
}
