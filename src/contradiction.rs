//! Contradiction detection on the write path.
//!
//! When a new memory arrives, looks for existing memories in the target
//! store that are suspiciously similar — by embedding cosine when vectors
//! exist, by word overlap otherwise. The engine does not attempt semantic
//! entailment; what to do with a hit is the caller's [`ConflictMode`].

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::memory::{cosine_similarity, Memory};
use crate::store::Store;

/// Similarity at or above which an existing memory counts as a conflict.
pub const DEFAULT_CONTRADICTION_THRESHOLD: f64 = 0.75;

/// Maximum number of conflicts reported per write.
const MAX_CANDIDATES: usize = 5;

/// How `remember` handles detected contradictions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    /// Store the new memory alongside existing ones, flagging the conflict
    /// in metadata. The default.
    #[default]
    KeepBoth,
    /// Overwrite the most similar existing memory.
    Update,
    /// Discard the new memory when a conflict is found.
    Skip,
}

impl ConflictMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepBoth => "keep_both",
            Self::Update => "update",
            Self::Skip => "skip",
        }
    }
}

impl std::str::FromStr for ConflictMode {
    type Err = crate::error::MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "keep_both" => Ok(Self::KeepBoth),
            "update" => Ok(Self::Update),
            "skip" => Ok(Self::Skip),
            other => Err(crate::error::MeshError::invalid(format!(
                "unknown on_conflict mode {other:?}, expected keep_both, update, or skip"
            ))),
        }
    }
}

/// Find stored memories that may contradict `text`.
///
/// With an embedding, scans embedded rows and keeps those whose cosine
/// similarity clears `threshold`. Without one, runs a keyword search seeded
/// from the first words of the text and scores candidates by word-set
/// overlap. Results are sorted by similarity descending, capped at five.
pub fn find_contradictions(
    text: &str,
    embedding: Option<&[f32]>,
    store: &dyn Store,
    threshold: f64,
) -> Result<Vec<(Memory, f64)>> {
    let mut candidates: Vec<(Memory, f64)> = Vec::new();

    match embedding {
        Some(query) => {
            for mem in store.scan_with_embeddings(crate::store::MAX_SCAN_LIMIT)? {
                if let Some(stored) = mem.embedding.as_deref() {
                    let sim = cosine_similarity(query, stored);
                    if sim >= threshold {
                        candidates.push((mem, sim));
                    }
                }
            }
        }
        None => {
            let seed: String = text
                .split_whitespace()
                .take(5)
                .collect::<Vec<_>>()
                .join(" ");
            if !seed.is_empty() {
                for mem in store.search_by_text(&seed, MAX_CANDIDATES * 2)? {
                    let sim = word_overlap(text, &mem.text);
                    if sim >= threshold {
                        candidates.push((mem, sim));
                    }
                }
            }
        }
    }

    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(MAX_CANDIDATES);
    Ok(candidates)
}

/// Word-level Jaccard similarity between two texts, in `[0, 1]`.
fn word_overlap(a: &str, b: &str) -> f64 {
    let words_a: std::collections::HashSet<String> =
        a.to_lowercase().split_whitespace().map(String::from).collect();
    let words_b: std::collections::HashSet<String> =
        b.to_lowercase().split_whitespace().map(String::from).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}
