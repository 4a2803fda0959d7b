//! Relevance scoring and time-based decay.
//!
//! Combines semantic similarity, recency, importance, and access frequency
//! into a single score that decides which memories surface during recall.
//! Everything here is pure: candidates are snapshots, and nothing is
//! persisted from this module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::{cosine_similarity, Memory};

/// Weights controlling how each signal contributes to the final score.
///
/// Weights must be non-negative and need not sum to 1; the engine normalises
/// by their total.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RelevanceWeights {
    /// Cosine similarity between query and memory embeddings.
    pub semantic: f64,
    /// How recently the memory was updated or accessed.
    pub recency: f64,
    /// The memory's (decayed) importance.
    pub importance: f64,
    /// Normalised access count.
    pub frequency: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            recency: 0.2,
            importance: 0.2,
            frequency: 0.1,
        }
    }
}

impl RelevanceWeights {
    pub fn total(&self) -> f64 {
        self.semantic + self.recency + self.importance + self.frequency
    }
}

/// Scores, decays, and ranks memories.
#[derive(Debug, Clone)]
pub struct RelevanceEngine {
    weights: RelevanceWeights,
    /// Days at which the recency signal has decayed to 1/e.
    max_recency_days: f64,
    /// Access count at which the frequency signal saturates.
    max_access_count: u32,
}

impl Default for RelevanceEngine {
    fn default() -> Self {
        Self::new(RelevanceWeights::default(), 30.0, 100)
    }
}

impl RelevanceEngine {
    pub fn new(weights: RelevanceWeights, max_recency_days: f64, max_access_count: u32) -> Self {
        Self {
            weights,
            max_recency_days: max_recency_days.max(1.0),
            max_access_count: max_access_count.max(1),
        }
    }

    pub fn weights(&self) -> RelevanceWeights {
        self.weights
    }

    /// Composite relevance score for a single memory, in roughly `[0, 1]`.
    ///
    /// The semantic component is 0 when either embedding is missing or the
    /// dimensions disagree; the remaining components always contribute.
    pub fn score(&self, memory: &Memory, query_embedding: Option<&[f32]>, now: DateTime<Utc>) -> f64 {
        let w = self.weights;
        let total = w.total();
        if total == 0.0 {
            return 0.0;
        }

        let sem_score = match (query_embedding, memory.embedding.as_deref()) {
            (Some(q), Some(m)) if q.len() == m.len() && !q.is_empty() => {
                (cosine_similarity(q, m) + 1.0) / 2.0
            }
            _ => 0.0,
        };

        let days_since = days_between(memory.updated_at, now);
        let recency_score = (-days_since / self.max_recency_days).exp();

        let importance_score = memory.importance;

        let freq_score = (memory.access_count as f64 / self.max_access_count as f64).min(1.0);

        (w.semantic * sem_score
            + w.recency * recency_score
            + w.importance * importance_score
            + w.frequency * freq_score)
            / total
    }

    /// Apply time-based importance decay to candidate snapshots.
    ///
    /// `importance = importance * exp(-decay_rate * days_since_update)`,
    /// clamped to `[0, 1]`. Pinned memories (`decay_rate == 0`) are
    /// unaffected. Mutates only the in-memory copies.
    pub fn apply_decay(&self, memories: &mut [Memory], now: DateTime<Utc>) {
        for mem in memories.iter_mut() {
            let days = days_between(mem.updated_at, now);
            if mem.decay_rate > 0.0 && days > 0.0 {
                mem.importance = (mem.importance * (-mem.decay_rate * days).exp()).clamp(0.0, 1.0);
            }
        }
    }

    /// Effective importance of a single memory at evaluation time.
    pub fn decayed_importance(&self, memory: &Memory, now: DateTime<Utc>) -> f64 {
        let days = days_between(memory.updated_at, now);
        if memory.decay_rate > 0.0 && days > 0.0 {
            (memory.importance * (-memory.decay_rate * days).exp()).clamp(0.0, 1.0)
        } else {
            memory.importance
        }
    }

    /// Return the top-`k` memories by descending relevance.
    ///
    /// Candidates below `min_relevance` are dropped. `boost` multiplies the
    /// score of memories it selects (session boost). Equal scores break on
    /// more recent `updated_at`, then lexicographic id.
    pub fn rank(
        &self,
        memories: Vec<Memory>,
        query_embedding: Option<&[f32]>,
        k: usize,
        min_relevance: f64,
        now: DateTime<Utc>,
        boost: impl Fn(&Memory) -> f64,
    ) -> Vec<Memory> {
        let mut scored: Vec<(f64, Memory)> = memories
            .into_iter()
            .filter_map(|mem| {
                let s = self.score(&mem, query_embedding, now) * boost(&mem);
                (s >= min_relevance).then_some((s, mem))
            })
            .collect();

        scored.sort_by(|(sa, ma), (sb, mb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| mb.updated_at.cmp(&ma.updated_at))
                .then_with(|| ma.id.cmp(&mb.id))
        });

        scored.truncate(k);
        scored.into_iter().map(|(_, mem)| mem).collect()
    }
}

fn days_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let delta_seconds = (now - earlier).num_milliseconds() as f64 / 1000.0;
    delta_seconds.max(0.0) / 86_400.0
}
