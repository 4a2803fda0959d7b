//! Duplicate detection and memory compaction.
//!
//! Scans a store for near-duplicate pairs — first by text similarity
//! (Jaccard word sets plus a containment check), then by embedding cosine
//! among the still-unpaired — and merges each pair into its primary memory.
//! Long runs are chunked and honour a cancellation flag so `close()` can
//! interrupt an in-flight pass.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::info;

use crate::error::{MeshError, Result};
use crate::memory::{cosine_similarity, Memory, Metadata};
use crate::store::Store;

/// Default text-similarity threshold for merging.
pub const DEFAULT_COMPACTION_THRESHOLD: f64 = 0.85;

/// Cosine threshold for the embedding phase, stricter than the text phase.
const EMBEDDING_PHASE_THRESHOLD: f64 = 0.9;

/// Pairs checked between cancellation-flag polls.
const CANCEL_CHECK_INTERVAL: usize = 256;

/// What a compaction pass merged (or would merge, under `dry_run`).
#[derive(Debug, Default, Serialize)]
pub struct CompactionResult {
    /// Number of merges performed; each combines two memories into one.
    pub merged_count: usize,
    /// Secondary memories that were (or would be) deleted.
    pub deleted_ids: Vec<String>,
    /// Primary memories that were kept and updated.
    pub kept_ids: Vec<String>,
}

/// Word-set Jaccard similarity.
pub fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.to_lowercase().split_whitespace().map(String::from).collect();
    let set_b: HashSet<String> = b.to_lowercase().split_whitespace().map(String::from).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

/// Text similarity with a containment shortcut: when one text contains the
/// other they are duplicates outright, otherwise Jaccard decides.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let a_trim = a_lower.trim();
    let b_trim = b_lower.trim();
    if a_trim.contains(b_trim) || b_trim.contains(a_trim) {
        return 1.0;
    }
    jaccard_similarity(a, b)
}

/// Choose which of a pair survives a merge.
///
/// Higher importance wins; ties break on higher access count, then the more
/// recently updated memory.
fn pick_primary(a: Memory, b: Memory) -> (Memory, Memory) {
    if a.importance > b.importance {
        return (a, b);
    }
    if b.importance > a.importance {
        return (b, a);
    }
    if a.access_count != b.access_count {
        return if a.access_count > b.access_count {
            (a, b)
        } else {
            (b, a)
        };
    }
    if a.updated_at >= b.updated_at {
        (a, b)
    } else {
        (b, a)
    }
}

/// Merge two memories into the primary's record.
///
/// Access counts are summed, metadata keys unioned with the primary winning
/// conflicts, and the secondary's text appended when it differs enough to
/// carry extra information.
pub fn merge_memories(primary: &Memory, secondary: &Memory) -> Memory {
    let text = if jaccard_similarity(&primary.text, &secondary.text) < 0.95 {
        format!(
            "{}\n---\n{}",
            primary.text.trim_end(),
            secondary.text.trim_start()
        )
    } else {
        primary.text.clone()
    };

    let mut metadata = Metadata::new();
    for (k, v) in &secondary.metadata {
        metadata.insert(k.clone(), v.clone());
    }
    for (k, v) in &primary.metadata {
        metadata.insert(k.clone(), v.clone());
    }

    Memory {
        id: primary.id.clone(),
        text,
        metadata,
        embedding: primary.embedding.clone(),
        session_id: primary.session_id.clone(),
        created_at: primary.created_at.min(secondary.created_at),
        updated_at: primary.updated_at.max(secondary.updated_at),
        access_count: primary.access_count + secondary.access_count,
        importance: primary.importance.max(secondary.importance),
        decay_rate: primary.decay_rate.min(secondary.decay_rate),
        scope: primary.scope,
    }
}

fn check_cancelled(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        return Err(MeshError::Cancelled);
    }
    Ok(())
}

/// Find duplicate pairs by text similarity.
fn find_text_pairs(
    memories: &[Memory],
    threshold: f64,
    cancel: &AtomicBool,
) -> Result<Vec<(Memory, Memory)>> {
    let mut pairs = Vec::new();
    let mut paired: HashSet<String> = HashSet::new();
    let mut checked = 0usize;

    for i in 0..memories.len() {
        if paired.contains(&memories[i].id) {
            continue;
        }
        for j in (i + 1)..memories.len() {
            if paired.contains(&memories[j].id) {
                continue;
            }
            checked += 1;
            if checked % CANCEL_CHECK_INTERVAL == 0 {
                check_cancelled(cancel)?;
            }
            if text_similarity(&memories[i].text, &memories[j].text) >= threshold {
                let (primary, secondary) = pick_primary(memories[i].clone(), memories[j].clone());
                paired.insert(primary.id.clone());
                paired.insert(secondary.id.clone());
                pairs.push((primary, secondary));
                break;
            }
        }
    }
    Ok(pairs)
}

/// Find near-duplicate pairs among embedded memories by cosine similarity.
fn find_embedding_pairs(
    memories: &[Memory],
    threshold: f64,
    cancel: &AtomicBool,
) -> Result<Vec<(Memory, Memory)>> {
    let embedded: Vec<&Memory> = memories.iter().filter(|m| m.embedding.is_some()).collect();
    let mut pairs = Vec::new();
    let mut paired: HashSet<String> = HashSet::new();
    let mut checked = 0usize;

    for i in 0..embedded.len() {
        if paired.contains(&embedded[i].id) {
            continue;
        }
        for j in (i + 1)..embedded.len() {
            if paired.contains(&embedded[j].id) {
                continue;
            }
            checked += 1;
            if checked % CANCEL_CHECK_INTERVAL == 0 {
                check_cancelled(cancel)?;
            }
            let sim = cosine_similarity(
                embedded[i].embedding.as_deref().unwrap_or(&[]),
                embedded[j].embedding.as_deref().unwrap_or(&[]),
            );
            if sim >= threshold {
                let (primary, secondary) =
                    pick_primary(embedded[i].clone(), embedded[j].clone());
                paired.insert(primary.id.clone());
                paired.insert(secondary.id.clone());
                pairs.push((primary, secondary));
                break;
            }
        }
    }
    Ok(pairs)
}

/// Compact a store by merging duplicates and near-duplicates.
///
/// Phase 1 pairs memories whose text similarity clears `threshold`; phase 2
/// pairs the remaining embedded memories at a stricter cosine threshold.
/// With `dry_run` the plan is computed but nothing is written. Returns
/// `Cancelled` if the flag flips mid-pass; the store is left in a valid
/// state either way since each merge commits independently.
pub fn compact_store(
    store: &dyn Store,
    threshold: f64,
    dry_run: bool,
    cancel: &AtomicBool,
) -> Result<CompactionResult> {
    let memories = store.list_all(crate::store::MAX_ROWS, 0)?;
    if memories.len() < 2 {
        return Ok(CompactionResult::default());
    }

    let mut pairs = find_text_pairs(&memories, threshold, cancel)?;

    let already_paired: HashSet<String> = pairs
        .iter()
        .flat_map(|(p, s)| [p.id.clone(), s.id.clone()])
        .collect();
    let unpaired: Vec<Memory> = memories
        .into_iter()
        .filter(|m| !already_paired.contains(&m.id))
        .collect();
    if unpaired.len() >= 2 {
        pairs.extend(find_embedding_pairs(
            &unpaired,
            EMBEDDING_PHASE_THRESHOLD,
            cancel,
        )?);
    }

    let mut result = CompactionResult::default();
    for (primary, secondary) in pairs {
        check_cancelled(cancel)?;
        if !dry_run {
            let merged = merge_memories(&primary, &secondary);
            store.save(&merged)?;
            store.delete(&secondary.id)?;
        }
        result.merged_count += 1;
        result.deleted_ids.push(secondary.id);
        result.kept_ids.push(primary.id);
    }

    info!(
        merged = result.merged_count,
        dry_run, threshold, "compaction pass finished"
    );
    Ok(result)
}
