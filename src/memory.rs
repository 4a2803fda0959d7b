//! Core memory record and scope definitions.
//!
//! Defines [`Memory`] (one stored unit of knowledge), [`Scope`] (which of the
//! two stores a memory lives in), and the embedding blob helpers shared by the
//! storage and relevance layers.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{MeshError, Result};

/// Maximum memory text length, in characters.
pub const MAX_TEXT_CHARS: usize = 100_000;

/// Maximum serialised metadata size, in bytes.
pub const MAX_METADATA_BYTES: usize = 10_000;

/// Metadata map type used throughout the engine.
pub type Metadata = Map<String, Value>;

/// Which store a memory belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Project-local memories, stored in `<root>/.memorymesh/memories.db`.
    Project,
    /// Cross-project memories, stored in `~/.memorymesh/global.db`.
    Global,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::Global => "global",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "project" => Ok(Self::Project),
            "global" => Ok(Self::Global),
            other => Err(MeshError::invalid(format!(
                "unknown scope {other:?}, expected \"project\" or \"global\""
            ))),
        }
    }
}

/// A single unit of memory.
///
/// Returned `Memory` values are snapshots: mutating them never propagates to
/// storage. All persisted mutation goes through the store's update methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// 32 lowercase hex chars (a random 128-bit id).
    pub id: String,
    /// The textual content. Non-empty after trimming, at most
    /// [`MAX_TEXT_CHARS`] characters.
    pub text: String,
    /// Arbitrary key-value metadata attached to this memory.
    #[serde(default)]
    pub metadata: Metadata,
    /// Vector embedding of the text, or `None` when no provider produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Session/episode identifier for grouping memories by conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Set on insert, never mutated afterwards.
    pub created_at: DateTime<Utc>,
    /// Bumped on recall hits and explicit updates.
    pub updated_at: DateTime<Utc>,
    /// Number of times this memory has been returned by recall.
    pub access_count: u32,
    /// Importance in `[0, 1]`; clamped on construction.
    pub importance: f64,
    /// Importance decay per day. `0` means the memory never fades.
    pub decay_rate: f64,
    /// Which store this memory came from. Filled in by the orchestrator when
    /// materialising results; not stored in the row itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<Scope>,
}

impl Memory {
    /// Create a new memory with a fresh id and current timestamps.
    ///
    /// Returns `InvalidArgument` if the text is empty after trimming.
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(MeshError::invalid("memory text must not be empty"));
        }
        let now = Utc::now();
        Ok(Self {
            id: new_id(),
            text,
            metadata: Metadata::new(),
            embedding: None,
            session_id: None,
            created_at: now,
            updated_at: now,
            access_count: 0,
            importance: 0.5,
            decay_rate: 0.01,
            scope: None,
        })
    }

    /// Clamp `importance` to `[0, 1]` and `decay_rate` to `>= 0`.
    pub fn clamp_ranges(&mut self) {
        self.importance = self.importance.clamp(0.0, 1.0);
        self.decay_rate = self.decay_rate.max(0.0);
    }

    /// Validate the record against the storage limits.
    ///
    /// Checks text length, serialised metadata size, and embedding
    /// finiteness. The store additionally enforces dimension consistency
    /// against its stamped embedding dimension.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(MeshError::invalid("memory text must not be empty"));
        }
        let chars = self.text.chars().count();
        if chars > MAX_TEXT_CHARS {
            return Err(MeshError::invalid(format!(
                "memory text is {chars} chars, maximum is {MAX_TEXT_CHARS}"
            )));
        }
        let meta_len = serde_json::to_string(&self.metadata)?.len();
        if meta_len > MAX_METADATA_BYTES {
            return Err(MeshError::invalid(format!(
                "serialised metadata is {meta_len} bytes, maximum is {MAX_METADATA_BYTES}"
            )));
        }
        if let Some(emb) = &self.embedding {
            if emb.is_empty() {
                return Err(MeshError::invalid("embedding must not be empty"));
            }
            if emb.iter().any(|v| !v.is_finite()) {
                return Err(MeshError::invalid(
                    "embedding contains NaN or infinite values",
                ));
            }
        }
        if self.created_at > self.updated_at {
            return Err(MeshError::invalid("created_at must not exceed updated_at"));
        }
        Ok(())
    }

    /// First 60 chars of the text, for log lines.
    pub fn preview(&self) -> String {
        let mut out: String = self.text.chars().take(60).collect();
        if self.text.chars().count() > 60 {
            out.push_str("...");
        }
        out
    }
}

/// Generate a new memory identifier: 32 lowercase hex chars.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Render a timestamp the way rows store it: RFC 3339 UTC with a trailing Z.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back into a UTC instant.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MeshError::invalid(format!("bad timestamp {raw:?}: {e}")))
}

/// Pack an f32 vector into a little-endian blob for SQLite storage.
pub fn pack_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for v in embedding {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Unpack a blob previously created by [`pack_embedding`].
pub fn unpack_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity between two vectors, in `[-1, 1]`.
///
/// Returns `0.0` for mismatched lengths or zero-magnitude inputs, so callers
/// never have to special-case degenerate vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut mag_a = 0.0f64;
    let mut mag_b = 0.0f64;
    for (&ai, &bi) in a.iter().zip(b.iter()) {
        dot += ai as f64 * bi as f64;
        mag_a += ai as f64 * ai as f64;
        mag_b += bi as f64 * bi as f64;
    }
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a.sqrt() * mag_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_memory_has_hex_id_and_defaults() {
        let mem = Memory::new("hello world").unwrap();
        assert_eq!(mem.id.len(), 32);
        assert!(mem.id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(mem.access_count, 0);
        assert!((mem.importance - 0.5).abs() < f64::EPSILON);
        assert!(mem.created_at <= mem.updated_at);
    }

    #[test]
    fn empty_text_rejected() {
        assert!(Memory::new("").is_err());
        assert!(Memory::new("   \n\t ").is_err());
    }

    #[test]
    fn clamp_ranges_bounds_fields() {
        let mut mem = Memory::new("x y z").unwrap();
        mem.importance = 3.5;
        mem.decay_rate = -1.0;
        mem.clamp_ranges();
        assert_eq!(mem.importance, 1.0);
        assert_eq!(mem.decay_rate, 0.0);
    }

    #[test]
    fn validate_text_length_boundary() {
        let mut mem = Memory::new("placeholder").unwrap();
        mem.text = "a".repeat(MAX_TEXT_CHARS);
        assert!(mem.validate().is_ok());
        mem.text = "a".repeat(MAX_TEXT_CHARS + 1);
        assert!(mem.validate().is_err());
    }

    #[test]
    fn validate_rejects_nan_embedding() {
        let mut mem = Memory::new("has embedding").unwrap();
        mem.embedding = Some(vec![0.1, f32::NAN, 0.3]);
        assert!(mem.validate().is_err());
        mem.embedding = Some(vec![0.1, 0.2, 0.3]);
        assert!(mem.validate().is_ok());
    }

    #[test]
    fn embedding_blob_roundtrip() {
        let original = vec![0.0f32, 1.5, -2.25, 1e-7];
        let blob = pack_embedding(&original);
        assert_eq!(blob.len(), 16);
        assert_eq!(unpack_embedding(&blob), original);
    }

    #[test]
    fn cosine_identical_and_orthogonal() {
        let a = [1.0f32, 0.0, 0.0];
        let b = [0.0f32, 1.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&a, &b).abs() < 1e-9);
        assert_eq!(cosine_similarity(&a, &[]), 0.0);
        assert_eq!(cosine_similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn timestamp_roundtrip_keeps_utc_z() {
        let now = Utc::now();
        let raw = format_timestamp(now);
        assert!(raw.ends_with('Z'));
        let parsed = parse_timestamp(&raw).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
