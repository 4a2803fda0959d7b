//! Embeddable persistent memory for AI applications.
//!
//! MemoryMesh stores free-form text memories durably in SQLite and recalls
//! them later by natural-language query, ranked by a composite of semantic
//! similarity, recency, importance, and access frequency with time-based
//! decay.
//!
//! ```no_run
//! use memorymesh::{MemoryMesh, MeshOptions, RecallOptions, RememberOptions};
//!
//! let mesh = MemoryMesh::open(MeshOptions::default())?;
//! mesh.remember("The user prefers dark mode.", RememberOptions::default())?;
//! let results = mesh.recall("What theme does the user like?", RecallOptions::default())?;
//! # Ok::<(), memorymesh::MeshError>(())
//! ```
//!
//! # Architecture
//!
//! - **Storage**: two SQLite stores — a per-project database and a global
//!   one — behind a single [`store::Store`] contract, with optional
//!   field-level encryption at rest
//! - **Embeddings**: pluggable providers ([`embedding::EmbeddingProvider`])
//!   that degrade to keyword search when unavailable
//! - **Ranking**: pure scoring in [`relevance`], with exponential
//!   importance decay and session boosting
//! - **Write pipeline**: auto-importance and auto-categorisation
//!   heuristics, secret detection, contradiction handling, and periodic
//!   deduplicating compaction
//!
//! # Modules
//!
//! - [`mesh`] — the [`MemoryMesh`] orchestrator façade
//! - [`store`] — SQLite persistence, migrations, and encryption
//! - [`embedding`] — embedding providers and the registration hook
//! - [`relevance`] — scoring, decay, and ranking
//! - [`categories`], [`importance`], [`privacy`] — write-path heuristics
//! - [`contradiction`], [`compaction`] — conflict handling and dedup
//! - [`server`] — line-delimited JSON-RPC adapter over stdio

pub mod categories;
pub mod compaction;
pub mod config;
pub mod contradiction;
pub mod embedding;
pub mod error;
pub mod importance;
pub mod memory;
pub mod mesh;
pub mod privacy;
pub mod relevance;
pub mod server;
pub mod store;

pub use categories::Category;
pub use config::MeshOptions;
pub use contradiction::ConflictMode;
pub use error::{MeshError, Result};
pub use memory::{Memory, Scope};
pub use mesh::{MemoryMesh, RecallOptions, RememberOptions, SessionContext, UpdateRequest};
pub use relevance::RelevanceWeights;
