//! The public façade: dual-store routing, write pipeline, recall pipeline.
//!
//! [`MemoryMesh`] owns an optional project store, a required global store,
//! an embedding provider, and a relevance engine, and routes every operation
//! to the right store(s). Returned memories are snapshots; all persisted
//! mutation goes through the stores.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::categories::{auto_categorize, infer_scope, Category};
use crate::compaction::{compact_store, CompactionResult, DEFAULT_COMPACTION_THRESHOLD};
use crate::config::{migrate_legacy_db, MeshOptions};
use crate::contradiction::{find_contradictions, ConflictMode, DEFAULT_CONTRADICTION_THRESHOLD};
use crate::embedding::{EmbeddingProvider, ProviderRegistry};
use crate::error::{MeshError, Result};
use crate::importance::score_importance;
use crate::memory::{Memory, Metadata, Scope};
use crate::privacy::{check_for_secrets, redact_secrets};
use crate::relevance::{RelevanceEngine, RelevanceWeights};
use crate::store::encrypted::EncryptedStore;
use crate::store::{MemoryPatch, MemoryStore, SearchFilter, SessionSummary, Store};

/// Per-call options for [`MemoryMesh::remember`].
#[derive(Default, Clone)]
pub struct RememberOptions {
    pub metadata: Option<Metadata>,
    /// Defaults to 0.5 when unset and no heuristic applies.
    pub importance: Option<f64>,
    /// Defaults to 0.01 when unset.
    pub decay_rate: Option<f64>,
    pub scope: Option<Scope>,
    /// Override importance with the heuristic score.
    pub auto_importance: bool,
    pub session_id: Option<String>,
    pub category: Option<Category>,
    /// Detect the category from the text; implies `auto_importance`.
    pub auto_categorize: bool,
    /// Maximum importance, never decays.
    pub pin: bool,
    /// Replace detected secrets with `[REDACTED]` before storing.
    pub redact: bool,
    pub on_conflict: ConflictMode,
}

/// Per-call options for [`MemoryMesh::recall`].
#[derive(Clone)]
pub struct RecallOptions {
    pub k: usize,
    pub min_relevance: f64,
    pub scope: Option<Scope>,
    /// Boost memories from this session during ranking.
    pub session_id: Option<String>,
    pub category: Option<Category>,
    pub min_importance: Option<f64>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub metadata_filter: Option<Metadata>,
}

impl Default for RecallOptions {
    fn default() -> Self {
        Self {
            k: 5,
            min_relevance: 0.0,
            scope: None,
            session_id: None,
            category: None,
            min_importance: None,
            time_range: None,
            metadata_filter: None,
        }
    }
}

/// Fields accepted by [`MemoryMesh::update`].
#[derive(Default, Clone)]
pub struct UpdateRequest {
    pub text: Option<String>,
    pub importance: Option<f64>,
    pub decay_rate: Option<f64>,
    pub metadata: Option<Metadata>,
    /// Moving a memory across scopes deletes it from the old store and
    /// re-creates it in the target store.
    pub scope: Option<Scope>,
}

/// Structured context returned by [`MemoryMesh::session_start`].
#[derive(Debug, Default, Serialize)]
pub struct SessionContext {
    pub user_profile: Vec<String>,
    pub guardrails: Vec<String>,
    pub common_mistakes: Vec<String>,
    pub common_questions: Vec<String>,
    pub project_context: Vec<String>,
    pub last_session: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// The memory engine façade.
pub struct MemoryMesh {
    project_store: Option<Arc<dyn Store>>,
    global_store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    engine: RelevanceEngine,
    session_boost: f64,
    compact_interval: u32,
    writes_since_compact: AtomicU32,
    cancel: Arc<AtomicBool>,
    compact_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryMesh {
    /// Open the engine with the built-in provider registry.
    pub fn open(options: MeshOptions) -> Result<Self> {
        Self::open_with_registry(options, &ProviderRegistry::default())
    }

    /// Open the engine, resolving the embedding provider from `registry`.
    ///
    /// The global store must always be openable; its absence is a
    /// construction error. The project store is optional.
    pub fn open_with_registry(options: MeshOptions, registry: &ProviderRegistry) -> Result<Self> {
        migrate_legacy_db()?;

        let open_store = |path: &std::path::Path| -> Result<Arc<dyn Store>> {
            let inner = MemoryStore::open(path)?;
            match &options.encryption_passphrase {
                Some(passphrase) => Ok(Arc::new(EncryptedStore::new(inner, passphrase)?)),
                None => Ok(Arc::new(inner)),
            }
        };

        let project_store = options
            .project_path
            .as_deref()
            .map(open_store)
            .transpose()?;
        let global_store = open_store(&options.resolved_global_path())?;

        let embedder: Arc<dyn EmbeddingProvider> = registry
            .create(&options.embedding_provider, &options.embedding)?
            .into();

        let engine = RelevanceEngine::new(
            options.weights,
            options.recency_horizon_days,
            options.frequency_cap,
        );

        info!(
            project = ?project_store.as_ref().map(|s| s.path().display().to_string()),
            global = %global_store.path().display(),
            provider = embedder.name(),
            "memory mesh initialised"
        );

        Ok(Self {
            project_store,
            global_store,
            embedder,
            engine,
            session_boost: options.session_boost.max(0.0),
            compact_interval: options.compact_interval,
            writes_since_compact: AtomicU32::new(0),
            cancel: Arc::new(AtomicBool::new(false)),
            compact_handle: Mutex::new(None),
        })
    }

    /// Project database path, when a project store is configured.
    pub fn project_path(&self) -> Option<&std::path::Path> {
        self.project_store.as_deref().map(|s| s.path())
    }

    /// Global database path.
    pub fn global_path(&self) -> &std::path::Path {
        self.global_store.path()
    }

    /// The configured relevance weights.
    pub fn weights(&self) -> RelevanceWeights {
        self.engine.weights()
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Store a new memory and return its id.
    ///
    /// Returns an empty string when `on_conflict` is [`ConflictMode::Skip`]
    /// and a contradiction was detected. With [`ConflictMode::Update`] the
    /// most similar existing memory is overwritten and its id returned.
    pub fn remember(&self, text: &str, options: RememberOptions) -> Result<String> {
        if text.trim().is_empty() {
            return Err(MeshError::invalid("memory text must not be empty"));
        }
        let mut text = text.to_string();
        let mut meta = options.metadata.unwrap_or_default();
        let mut scope = options.scope;
        let mut auto_importance = options.auto_importance;

        // Category handling. Auto-categorisation implies auto-importance,
        // and a category's routing rule decides the scope.
        let mut category = options.category;
        if options.auto_categorize && category.is_none() {
            category = Some(auto_categorize(&text));
            auto_importance = true;
        }
        if let Some(cat) = category {
            scope = Some(cat.scope());
            meta.insert("category".into(), json!(cat.as_str()));
        }

        // Subject inference runs only when neither scope nor category gave
        // a routing decision.
        if scope.is_none() {
            if let Some(inferred) = infer_scope(&text, self.project_name().as_deref()) {
                scope = Some(inferred);
            }
        }
        let scope = scope.unwrap_or({
            if self.project_store.is_some() {
                Scope::Project
            } else {
                Scope::Global
            }
        });
        let store = self.store_for_scope(scope)?;

        let mut importance = options.importance.unwrap_or(0.5);
        let mut decay_rate = options.decay_rate.unwrap_or(0.01);
        if options.pin {
            importance = 1.0;
            decay_rate = 0.0;
            meta.insert("pinned".into(), json!(true));
        } else if auto_importance {
            importance = score_importance(&text);
        }

        // Privacy guard.
        let secrets = check_for_secrets(&text);
        if !secrets.is_empty() {
            warn!(types = ?secrets, "potential secrets detected in memory text");
            meta.insert("has_secrets_warning".into(), json!(true));
            meta.insert("detected_secret_types".into(), json!(secrets));
            if options.redact {
                text = redact_secrets(&text);
            }
        }

        let embedding = self.safe_embed(&text);

        // Contradiction check against the target store.
        let contradictions = find_contradictions(
            &text,
            embedding.as_deref(),
            store.as_ref(),
            DEFAULT_CONTRADICTION_THRESHOLD,
        )?;
        if !contradictions.is_empty() {
            let ids: Vec<&str> = contradictions.iter().map(|(m, _)| m.id.as_str()).collect();
            warn!(conflicts = ?ids, "new memory may contradict existing memories");

            match options.on_conflict {
                ConflictMode::Skip => {
                    debug!("skipped storing memory (on_conflict=skip)");
                    return Ok(String::new());
                }
                ConflictMode::Update => {
                    let existing = &contradictions[0].0;
                    store.update_fields(
                        &existing.id,
                        MemoryPatch {
                            text: Some(text.clone()),
                            importance: Some(importance),
                            embedding: match &embedding {
                                Some(emb) => crate::store::EmbeddingPatch::Set(emb.clone()),
                                None => crate::store::EmbeddingPatch::Clear,
                            },
                            ..Default::default()
                        },
                    )?;
                    debug!(id = %existing.id, "replaced most similar memory (on_conflict=update)");
                    self.after_write(scope);
                    return Ok(existing.id.clone());
                }
                ConflictMode::KeepBoth => {
                    meta.insert("has_contradiction".into(), json!(true));
                    meta.insert(
                        "contradicts".into(),
                        json!(ids.iter().map(|s| s.to_string()).collect::<Vec<_>>()),
                    );
                }
            }
        }

        let mut memory = Memory::new(text)?;
        memory.metadata = meta;
        memory.embedding = embedding;
        memory.importance = importance;
        memory.decay_rate = decay_rate;
        memory.session_id = options.session_id;
        memory.clamp_ranges();

        store.save(&memory)?;
        debug!(id = %memory.id, scope = %scope, "remembered memory");

        self.after_write(scope);
        Ok(memory.id)
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Recall the most relevant memories for a query.
    ///
    /// Gathers candidates from the selected store(s) via vector scan plus
    /// keyword supplement (or pre-filtered SQL when filters are present),
    /// applies time decay, ranks, and bumps `access_count` on everything
    /// returned. A cold store yields an empty list, never an error.
    pub fn recall(&self, query: &str, options: RecallOptions) -> Result<Vec<Memory>> {
        if options.k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.safe_embed(query);

        let filter = SearchFilter {
            category: options.category,
            min_importance: options.min_importance,
            time_range: options.time_range,
            metadata_filter: options.metadata_filter.clone(),
        };
        let has_filters = filter.is_active();

        let mut candidates: Vec<Memory> = Vec::new();
        for (scope, store) in self.stores_for(options.scope) {
            let mut batch = if has_filters {
                store.search_filtered(&filter, crate::store::MAX_SCAN_LIMIT)?
            } else {
                self.gather_candidates(query, query_embedding.as_deref(), store.as_ref())?
            };
            for mem in &mut batch {
                mem.scope = Some(scope);
            }
            candidates.extend(batch);
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Deduplicate by id; the first (project) occurrence wins.
        let mut seen = std::collections::HashSet::new();
        candidates.retain(|m| seen.insert(m.id.clone()));

        let now = Utc::now();
        self.engine.apply_decay(&mut candidates, now);

        let session_id = options.session_id.as_deref();
        let boost = |mem: &Memory| {
            if session_id.is_some() && mem.session_id.as_deref() == session_id {
                self.session_boost
            } else {
                1.0
            }
        };
        let mut results = self.engine.rank(
            candidates,
            query_embedding.as_deref(),
            options.k,
            options.min_relevance,
            now,
            boost,
        );

        // Side effect: bump access counts on everything returned. The
        // returned snapshots reflect the bump without re-reading.
        for mem in &mut results {
            if let Ok(store) = self.store_for_scope(mem.scope.unwrap_or(Scope::Global)) {
                store.update_access(&mem.id)?;
            }
            mem.access_count += 1;
        }

        Ok(results)
    }

    /// Delete one memory, checking the project store first.
    pub fn forget(&self, id: &str) -> Result<bool> {
        if let Some(project) = &self.project_store {
            if project.delete(id)? {
                debug!(id, "forgot memory (project)");
                return Ok(true);
            }
        }
        let deleted = self.global_store.delete(id)?;
        if deleted {
            debug!(id, "forgot memory (global)");
        }
        Ok(deleted)
    }

    /// Delete every memory in one scope. Returns the number removed.
    ///
    /// `None` means the project scope: wiping the global store requires an
    /// explicit `Some(Scope::Global)` so user-wide memories cannot be lost
    /// to a default.
    pub fn forget_all(&self, scope: Option<Scope>) -> Result<usize> {
        let scope = scope.unwrap_or(Scope::Project);
        let store = match (scope, &self.project_store) {
            (Scope::Project, None) => return Ok(0),
            (Scope::Project, Some(store)) => store.clone(),
            (Scope::Global, _) => self.global_store.clone(),
        };
        let count = store.clear()?;
        info!(count, scope = %scope, "forgot all memories");
        Ok(count)
    }

    /// Fetch one memory by id, checking the project store first.
    pub fn get(&self, id: &str) -> Result<Option<Memory>> {
        if let Some(project) = &self.project_store {
            if let Some(mut mem) = project.get(id)? {
                mem.scope = Some(Scope::Project);
                return Ok(Some(mem));
            }
        }
        Ok(self.global_store.get(id)?.map(|mut mem| {
            mem.scope = Some(Scope::Global);
            mem
        }))
    }

    /// Update an existing memory in place, or migrate it across scopes.
    ///
    /// Changing `text` re-embeds it. Returns the updated memory, or `None`
    /// when the id does not exist.
    pub fn update(&self, id: &str, request: UpdateRequest) -> Result<Option<Memory>> {
        let Some(current) = self.get(id)? else {
            return Ok(None);
        };
        let current_scope = current.scope.unwrap_or(Scope::Global);

        if let Some(target_scope) = request.scope {
            if target_scope != current_scope {
                let new_text = request.text.clone().unwrap_or_else(|| current.text.clone());
                let embedding = self.safe_embed(&new_text);

                let migrated = Memory {
                    id: current.id.clone(),
                    text: new_text,
                    metadata: request.metadata.clone().unwrap_or_else(|| current.metadata.clone()),
                    embedding,
                    session_id: current.session_id.clone(),
                    created_at: current.created_at,
                    updated_at: Utc::now(),
                    access_count: current.access_count,
                    importance: request.importance.unwrap_or(current.importance),
                    decay_rate: request.decay_rate.unwrap_or(current.decay_rate),
                    scope: Some(target_scope),
                };

                // Create in the target before removing the original, so a
                // failed save never loses the memory.
                let target = self.store_for_scope(target_scope)?;
                target.save(&migrated)?;
                self.store_for_scope(current_scope)?.delete(id)?;
                debug!(id, from = %current_scope, to = %target_scope, "migrated memory across scopes");
                return self.get(id);
            }
        }

        let embedding = match &request.text {
            Some(new_text) if *new_text != current.text => match self.safe_embed(new_text) {
                Some(emb) => crate::store::EmbeddingPatch::Set(emb),
                None => crate::store::EmbeddingPatch::Clear,
            },
            _ => crate::store::EmbeddingPatch::Keep,
        };

        let store = self.store_for_scope(current_scope)?;
        store.update_fields(
            id,
            MemoryPatch {
                text: request.text,
                importance: request.importance,
                decay_rate: request.decay_rate,
                metadata: request.metadata,
                embedding,
                updated_at: None,
            },
        )?;
        self.get(id)
    }

    /// List memories, newest first, merging both stores when `scope` is
    /// `None`.
    pub fn list(&self, limit: usize, offset: usize, scope: Option<Scope>) -> Result<Vec<Memory>> {
        match scope {
            Some(scope) => {
                let store = match (scope, &self.project_store) {
                    (Scope::Project, None) => return Ok(Vec::new()),
                    (Scope::Project, Some(store)) => store.clone(),
                    (Scope::Global, _) => self.global_store.clone(),
                };
                let mut mems = store.list_all(limit, offset)?;
                for mem in &mut mems {
                    mem.scope = Some(scope);
                }
                Ok(mems)
            }
            None => {
                let mut all: Vec<Memory> = Vec::new();
                for (scope, store) in self.stores_for(None) {
                    let mut batch = store.list_all(limit + offset, 0)?;
                    for mem in &mut batch {
                        mem.scope = Some(scope);
                    }
                    all.extend(batch);
                }
                all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                Ok(all.into_iter().skip(offset).take(limit).collect())
            }
        }
    }

    /// Count stored memories in one scope, or across both.
    pub fn count(&self, scope: Option<Scope>) -> Result<usize> {
        match scope {
            Some(Scope::Project) => match &self.project_store {
                Some(store) => store.count(),
                None => Ok(0),
            },
            Some(Scope::Global) => self.global_store.count(),
            None => {
                let mut total = self.global_store.count()?;
                if let Some(project) = &self.project_store {
                    total += project.count()?;
                }
                Ok(total)
            }
        }
    }

    /// Oldest and newest `created_at` across the selected scope(s).
    pub fn time_range(&self, scope: Option<Scope>) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let ranges: Vec<(DateTime<Utc>, DateTime<Utc>)> = self
            .stores_for(scope)
            .into_iter()
            .filter_map(|(_, store)| store.time_range().transpose())
            .collect::<Result<_>>()?;
        Ok(ranges
            .into_iter()
            .reduce(|(old_a, new_a), (old_b, new_b)| (old_a.min(old_b), new_a.max(new_b))))
    }

    /// All memories of one session, in chronological order.
    pub fn get_session(&self, session_id: &str, scope: Option<Scope>) -> Result<Vec<Memory>> {
        let mut results: Vec<Memory> = Vec::new();
        for (store_scope, store) in self.stores_for(scope) {
            let mut batch = store.get_by_session(session_id, crate::store::MAX_SCAN_LIMIT)?;
            for mem in &mut batch {
                mem.scope = Some(store_scope);
            }
            results.extend(batch);
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    /// Distinct sessions with summary statistics, most recent first.
    pub fn list_sessions(&self, scope: Option<Scope>, limit: usize) -> Result<Vec<SessionSummary>> {
        let mut results: Vec<SessionSummary> = Vec::new();
        for (store_scope, store) in self.stores_for(scope) {
            let mut batch = store.list_sessions(limit)?;
            for summary in &mut batch {
                summary.scope = Some(store_scope);
            }
            results.extend(batch);
        }
        results.sort_by(|a, b| b.last_at.cmp(&a.last_at));
        results.truncate(limit);
        Ok(results)
    }

    /// Merge near-duplicate memories in one scope.
    pub fn compact(&self, scope: Scope, threshold: f64, dry_run: bool) -> Result<CompactionResult> {
        let store = match (scope, &self.project_store) {
            (Scope::Project, None) => return Err(MeshError::NoProjectStore),
            (Scope::Project, Some(store)) => store.clone(),
            (Scope::Global, _) => self.global_store.clone(),
        };
        compact_store(store.as_ref(), threshold, dry_run, &self.cancel)
    }

    /// Query-free top-N ranking for export callers.
    ///
    /// Without a query there is no semantic signal, so the default weights
    /// lean on importance and recency instead.
    pub fn smart_sync(
        &self,
        top_n: usize,
        weights: Option<RelevanceWeights>,
        scope: Option<Scope>,
    ) -> Result<Vec<Memory>> {
        let weights = weights.unwrap_or(RelevanceWeights {
            semantic: 0.0,
            recency: 0.3,
            importance: 0.5,
            frequency: 0.2,
        });
        let engine = RelevanceEngine::new(weights, 30.0, 100);

        let mut candidates: Vec<Memory> = Vec::new();
        for (store_scope, store) in self.stores_for(scope) {
            let mut batch = store.list_all(crate::store::MAX_SCAN_LIMIT, 0)?;
            for mem in &mut batch {
                mem.scope = Some(store_scope);
            }
            candidates.extend(batch);
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        engine.apply_decay(&mut candidates, now);
        Ok(engine.rank(candidates, None, top_n, 0.0, now, |_| 1.0))
    }

    /// Structured context for the start of a new session.
    pub fn session_start(&self, project_context: Option<&str>) -> Result<SessionContext> {
        const MAX_PER_SECTION: usize = 5;

        let collect = |store: Option<&Arc<dyn Store>>| -> Result<Vec<Memory>> {
            match store {
                Some(store) => store.list_all(500, 0),
                None => Ok(Vec::new()),
            }
        };

        let bucket = |mems: &[Memory], category: Category| -> Vec<String> {
            let mut matched: Vec<&Memory> = mems
                .iter()
                .filter(|m| {
                    m.metadata.get("category").and_then(Value::as_str)
                        == Some(category.as_str())
                })
                .collect();
            matched.sort_by(|a, b| {
                b.importance
                    .partial_cmp(&a.importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            matched
                .into_iter()
                .take(MAX_PER_SECTION)
                .map(|m| m.text.clone())
                .collect()
        };

        let global_mems = collect(Some(&self.global_store))?;
        let project_mems = collect(self.project_store.as_ref())?;

        let mut context = SessionContext {
            user_profile: bucket(&global_mems, Category::Personality),
            guardrails: bucket(&global_mems, Category::Guardrail),
            common_mistakes: bucket(&global_mems, Category::Mistake),
            common_questions: bucket(&global_mems, Category::Question),
            project_context: bucket(&project_mems, Category::Context),
            last_session: bucket(&project_mems, Category::SessionSummary)
                .into_iter()
                .take(1)
                .collect(),
            warnings: Vec::new(),
        };

        context
            .user_profile
            .extend(bucket(&global_mems, Category::Preference));
        context.user_profile.truncate(MAX_PER_SECTION);

        context
            .project_context
            .extend(bucket(&project_mems, Category::Decision));
        context
            .project_context
            .extend(bucket(&project_mems, Category::Pattern));
        context.project_context.truncate(MAX_PER_SECTION);

        // Supplement project context with recall results for the query.
        if let Some(query) = project_context {
            if self.project_store.is_some() {
                let recalled = self.recall(
                    query,
                    RecallOptions {
                        k: MAX_PER_SECTION,
                        scope: Some(Scope::Project),
                        ..Default::default()
                    },
                )?;
                let existing: std::collections::HashSet<&String> =
                    context.project_context.iter().collect();
                let fresh: Vec<String> = recalled
                    .into_iter()
                    .map(|m| m.text)
                    .filter(|t| !existing.contains(t))
                    .collect();
                context.project_context.extend(fresh);
                context.project_context.truncate(MAX_PER_SECTION * 2);
            }
        }

        if self.project_store.is_none() {
            context
                .warnings
                .push("no project store configured; project-scope sections are empty".into());
        }
        if self.embedder.name() == "none" {
            context
                .warnings
                .push("embedding provider is 'none'; recall runs in keyword mode".into());
        }

        Ok(context)
    }

    /// Signal cancellation to any in-flight auto-compaction and wait for it.
    ///
    /// Data is durable without this call (the WAL commits on every write);
    /// closing promptly just releases file handles and stops background
    /// work.
    pub fn close(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Ok(mut guard) = self.compact_handle.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }

    // ------------------------------------------------------------------
    // Internal helpers
    // ------------------------------------------------------------------

    fn store_for_scope(&self, scope: Scope) -> Result<Arc<dyn Store>> {
        match scope {
            Scope::Global => Ok(self.global_store.clone()),
            Scope::Project => self
                .project_store
                .clone()
                .ok_or(MeshError::NoProjectStore),
        }
    }

    /// The store set an operation fans out to: both when `scope` is `None`,
    /// otherwise just the requested one (an absent project store is simply
    /// skipped on read paths).
    fn stores_for(&self, scope: Option<Scope>) -> Vec<(Scope, Arc<dyn Store>)> {
        let mut stores = Vec::new();
        if matches!(scope, None | Some(Scope::Project)) {
            if let Some(project) = &self.project_store {
                stores.push((Scope::Project, project.clone()));
            }
        }
        if matches!(scope, None | Some(Scope::Global)) {
            stores.push((Scope::Global, self.global_store.clone()));
        }
        stores
    }

    /// Project directory name, used as a scope-inference signal.
    fn project_name(&self) -> Option<String> {
        // <root>/.memorymesh/memories.db -> <root>
        self.project_store
            .as_deref()
            .and_then(|s| s.path().parent())
            .and_then(|p| p.parent())
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Embed text, degrading to `None` on any provider failure.
    fn safe_embed(&self, text: &str) -> Option<Vec<f32>> {
        match self.embedder.embed(text) {
            Ok(vector) => Some(vector),
            Err(_) => {
                debug!(provider = self.embedder.name(), "embedding unavailable, keyword mode");
                None
            }
        }
    }

    /// Candidate gathering for one store: embedded rows plus keyword hits,
    /// or keyword-only when no query embedding exists.
    fn gather_candidates(
        &self,
        query: &str,
        query_embedding: Option<&[f32]>,
        store: &dyn Store,
    ) -> Result<Vec<Memory>> {
        if query_embedding.is_none() {
            return keyword_candidates(query, store, 20);
        }

        let mut candidates = store.scan_with_embeddings(crate::store::MAX_SCAN_LIMIT)?;
        let seen: std::collections::HashSet<String> =
            candidates.iter().map(|m| m.id.clone()).collect();
        for hit in keyword_candidates(query, store, 10)? {
            if !seen.contains(&hit.id) {
                candidates.push(hit);
            }
        }
        Ok(candidates)
    }

    /// Post-write bookkeeping: count writes and kick off auto-compaction in
    /// the background when the interval is reached.
    fn after_write(&self, scope: Scope) {
        if self.compact_interval == 0 {
            return;
        }
        let writes = self.writes_since_compact.fetch_add(1, Ordering::Relaxed) + 1;
        if writes < self.compact_interval {
            return;
        }
        self.writes_since_compact.store(0, Ordering::Relaxed);

        let store = match self.store_for_scope(scope) {
            Ok(store) => store,
            Err(_) => return,
        };
        let cancel = self.cancel.clone();
        let handle = std::thread::spawn(move || {
            match compact_store(store.as_ref(), DEFAULT_COMPACTION_THRESHOLD, false, &cancel) {
                Ok(result) if result.merged_count > 0 => {
                    info!(merged = result.merged_count, "auto-compacted duplicates");
                }
                Ok(_) => {}
                Err(MeshError::Cancelled) => debug!("auto-compaction cancelled"),
                Err(e) => warn!(error = %e, "auto-compaction failed, will retry later"),
            }
        });

        // Keep only the newest handle; earlier passes have either finished
        // or will see the cancel flag on close.
        if let Ok(mut guard) = self.compact_handle.lock() {
            if let Some(previous) = guard.replace(handle) {
                let _ = previous.join();
            }
        }
    }
}

/// Keyword search: the full query as a substring, supplemented by a LIKE
/// scan per query token so natural-language questions still hit memories
/// that share only individual words.
fn keyword_candidates(query: &str, store: &dyn Store, limit: usize) -> Result<Vec<Memory>> {
    let mut candidates = store.search_by_text(query, limit)?;
    let mut seen: std::collections::HashSet<String> =
        candidates.iter().map(|m| m.id.clone()).collect();

    let mut tokens: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(String::from)
        .collect();
    tokens.dedup();
    for token in tokens.into_iter().take(8) {
        for hit in store.search_by_text(&token, limit)? {
            if seen.insert(hit.id.clone()) {
                candidates.push(hit);
            }
        }
    }
    Ok(candidates)
}

impl Drop for MemoryMesh {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemoryMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMesh")
            .field("project", &self.project_path())
            .field("global", &self.global_path())
            .field("provider", &self.embedder.name())
            .finish()
    }
}
