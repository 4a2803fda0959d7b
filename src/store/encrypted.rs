//! Field-encrypting wrapper around [`MemoryStore`].
//!
//! Encrypts `text` and the serialised metadata before writes and decrypts
//! after reads. Plaintext columns (`id`, timestamps, `access_count`,
//! `importance`, `decay_rate`, `session_id`, `embedding_blob`) stay queryable
//! so indexes keep working. The wrapper implements the full [`Store`]
//! contract: substring and metadata searches that cannot run in SQL against
//! ciphertext run over a bounded decrypted scan instead.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::crypto::{decrypt_field, encrypt_field, generate_salt, FieldKey, SALT_LEN};
use super::{MemoryPatch, MemoryStore, SearchFilter, SessionSummary, Store, MAX_SCAN_LIMIT};
use crate::error::{MeshError, Result};
use crate::memory::{Memory, Metadata};

const SALT_KEY: &str = "encryption_salt";
const PROBE_KEY: &str = "encryption_probe";
const PROBE_SENTINEL: &str = "memorymesh";

/// Metadata wrapper key holding the encrypted metadata payload.
const ENCRYPTED_META_KEY: &str = "_encrypted";

/// A [`MemoryStore`] whose sensitive fields are encrypted at rest.
pub struct EncryptedStore {
    inner: MemoryStore,
    key: FieldKey,
}

impl EncryptedStore {
    /// Wrap a store, deriving the field key from `passphrase`.
    ///
    /// A random salt is generated and persisted on first open; later opens
    /// reuse it. A probe record written alongside the salt is decrypted on
    /// every open, so a wrong passphrase fails here instead of surfacing as
    /// garbage reads later.
    pub fn new(inner: MemoryStore, passphrase: &str) -> Result<Self> {
        let salt = match inner.get_meta(SALT_KEY)? {
            Some(salt) => {
                if salt.len() != SALT_LEN {
                    return Err(MeshError::Encryption(format!(
                        "stored salt has {} bytes, expected {SALT_LEN}",
                        salt.len()
                    )));
                }
                salt
            }
            None => {
                if inner.count()? > 0 {
                    // Rows exist but no salt record: either the database was
                    // written unencrypted or the meta record was destroyed.
                    return Err(MeshError::Encryption(
                        "store has data but no encryption salt record".into(),
                    ));
                }
                let salt = generate_salt();
                inner.set_meta(SALT_KEY, &salt)?;
                salt.to_vec()
            }
        };

        let key = FieldKey::derive(passphrase, &salt);

        match inner.get_meta(PROBE_KEY)? {
            Some(probe) => {
                let raw = String::from_utf8(probe)
                    .map_err(|e| MeshError::Encryption(format!("corrupt probe record: {e}")))?;
                let plain = decrypt_field(&raw, &key)?;
                if plain != PROBE_SENTINEL {
                    return Err(MeshError::Encryption("probe decryption mismatch".into()));
                }
            }
            None => {
                let probe = encrypt_field(PROBE_SENTINEL, &key);
                inner.set_meta(PROBE_KEY, probe.as_bytes())?;
            }
        }

        debug!(path = %inner.path().display(), "encrypted store ready");
        Ok(Self { inner, key })
    }

    fn encrypt_memory(&self, memory: &Memory) -> Result<Memory> {
        let mut out = memory.clone();
        out.text = encrypt_field(&memory.text, &self.key);
        out.metadata = self.wrap_metadata(&memory.metadata)?;
        Ok(out)
    }

    fn wrap_metadata(&self, metadata: &Metadata) -> Result<Metadata> {
        let payload = serde_json::to_string(metadata)?;
        let mut wrapped = Metadata::new();
        wrapped.insert(
            ENCRYPTED_META_KEY.into(),
            Value::String(encrypt_field(&payload, &self.key)),
        );
        Ok(wrapped)
    }

    fn decrypt_memory(&self, mut memory: Memory) -> Result<Memory> {
        memory.text = decrypt_field(&memory.text, &self.key)?;
        let payload = match memory.metadata.get(ENCRYPTED_META_KEY) {
            Some(Value::String(p)) => Some(p.clone()),
            _ => None,
        };
        if let Some(payload) = payload {
            let plain = decrypt_field(&payload, &self.key)?;
            memory.metadata = serde_json::from_str(&plain)?;
        }
        // Metadata without the wrapper predates encryption; pass it through.
        Ok(memory)
    }

    fn decrypt_all(&self, memories: Vec<Memory>) -> Result<Vec<Memory>> {
        memories.into_iter().map(|m| self.decrypt_memory(m)).collect()
    }

    /// Decrypt a bounded scan for the search paths SQL can't serve.
    fn decrypted_scan(&self) -> Result<Vec<Memory>> {
        self.decrypt_all(self.inner.list_all(MAX_SCAN_LIMIT, 0)?)
    }

    fn matches_filter(memory: &Memory, filter: &SearchFilter) -> bool {
        if let Some(category) = filter.category {
            if memory.metadata.get("category").and_then(Value::as_str)
                != Some(category.as_str())
            {
                return false;
            }
        }
        if let Some(min) = filter.min_importance {
            if memory.importance < min {
                return false;
            }
        }
        if let Some((start, end)) = filter.time_range {
            if memory.created_at < start || memory.created_at > end {
                return false;
            }
        }
        if let Some(meta) = &filter.metadata_filter {
            for (key, expected) in meta {
                if memory.metadata.get(key) != Some(expected) {
                    return false;
                }
            }
        }
        true
    }
}

impl Store for EncryptedStore {
    fn path(&self) -> &Path {
        self.inner.path()
    }

    fn schema_version(&self) -> u32 {
        self.inner.schema_version()
    }

    fn save(&self, memory: &Memory) -> Result<()> {
        // Validate the plaintext record first; size limits apply to what the
        // caller wrote, not to ciphertext expansion.
        memory.validate()?;
        self.inner.save_unchecked(&self.encrypt_memory(memory)?)
    }

    fn get(&self, id: &str) -> Result<Option<Memory>> {
        self.inner.get(id)?.map(|m| self.decrypt_memory(m)).transpose()
    }

    fn delete(&self, id: &str) -> Result<bool> {
        self.inner.delete(id)
    }

    fn clear(&self) -> Result<usize> {
        self.inner.clear()
    }

    fn update_fields(&self, id: &str, patch: MemoryPatch) -> Result<bool> {
        let MemoryPatch {
            text,
            importance,
            decay_rate,
            metadata,
            embedding,
            updated_at,
        } = patch;

        let text = match text {
            Some(text) => {
                if text.trim().is_empty() {
                    return Err(MeshError::invalid("memory text must not be empty"));
                }
                Some(encrypt_field(&text, &self.key))
            }
            None => None,
        };
        let metadata = match metadata {
            Some(meta) => Some(self.wrap_metadata(&meta)?),
            None => None,
        };

        self.inner.update_fields(
            id,
            MemoryPatch {
                text,
                importance,
                decay_rate,
                metadata,
                embedding,
                updated_at,
            },
        )
    }

    fn update_access(&self, id: &str) -> Result<()> {
        self.inner.update_access(id)
    }

    fn search_by_text(&self, query: &str, limit: usize) -> Result<Vec<Memory>> {
        // LIKE cannot see through ciphertext; match over a decrypted scan.
        let needle = query.to_lowercase();
        let mut hits: Vec<Memory> = self
            .decrypted_scan()?
            .into_iter()
            .filter(|m| m.text.to_lowercase().contains(&needle))
            .collect();
        hits.truncate(limit);
        Ok(hits)
    }

    fn search_filtered(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<Memory>> {
        // Validate (including metadata-key identifiers) before touching rows,
        // matching the plaintext store's contract.
        filter.validate()?;

        let mut hits: Vec<Memory> = self
            .decrypted_scan()?
            .into_iter()
            .filter(|m| Self::matches_filter(m, filter))
            .collect();
        hits.truncate(limit);
        Ok(hits)
    }

    fn scan_with_embeddings(&self, limit: usize) -> Result<Vec<Memory>> {
        self.decrypt_all(self.inner.scan_with_embeddings(limit)?)
    }

    fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<Memory>> {
        self.decrypt_all(self.inner.list_all(limit, offset)?)
    }

    fn get_by_session(&self, session_id: &str, limit: usize) -> Result<Vec<Memory>> {
        self.decrypt_all(self.inner.get_by_session(session_id, limit)?)
    }

    fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        self.inner.list_sessions(limit)
    }

    fn count(&self) -> Result<usize> {
        self.inner.count()
    }

    fn time_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        self.inner.time_range()
    }
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedStore")
            .field("path", &self.inner.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_encrypted(dir: &TempDir, passphrase: &str) -> Result<EncryptedStore> {
        let inner = MemoryStore::open(dir.path().join("secure.db"))?;
        EncryptedStore::new(inner, passphrase)
    }

    fn sample(text: &str) -> Memory {
        let mut mem = Memory::new(text).unwrap();
        mem.metadata
            .insert("category".into(), Value::String("context".into()));
        mem
    }

    #[test]
    fn roundtrip_decrypts_text_and_metadata() {
        let dir = TempDir::new().unwrap();
        let store = open_encrypted(&dir, "hunter2 passphrase").unwrap();

        let mem = sample("the launch code is in the vault");
        store.save(&mem).unwrap();

        let loaded = store.get(&mem.id).unwrap().unwrap();
        assert_eq!(loaded.text, mem.text);
        assert_eq!(loaded.metadata, mem.metadata);
    }

    #[test]
    fn ciphertext_on_disk_differs_from_plaintext() {
        let dir = TempDir::new().unwrap();
        let store = open_encrypted(&dir, "hunter2 passphrase").unwrap();
        let mem = sample("visible only after decryption");
        store.save(&mem).unwrap();

        // Read through the raw inner store: text must be ciphertext.
        let raw = store.inner.get(&mem.id).unwrap().unwrap();
        assert_ne!(raw.text, mem.text);
        assert!(raw.metadata.contains_key(ENCRYPTED_META_KEY));
    }

    #[test]
    fn wrong_passphrase_rejected_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_encrypted(&dir, "correct passphrase").unwrap();
            store.save(&sample("sealed")).unwrap();
        }
        let err = open_encrypted(&dir, "wrong passphrase").unwrap_err();
        assert!(matches!(err, MeshError::Encryption(_)));
    }

    #[test]
    fn same_passphrase_reopens_with_persisted_salt() {
        let dir = TempDir::new().unwrap();
        let id = {
            let store = open_encrypted(&dir, "stable passphrase").unwrap();
            let mem = sample("survives reopen");
            store.save(&mem).unwrap();
            mem.id
        };
        let store = open_encrypted(&dir, "stable passphrase").unwrap();
        assert_eq!(store.get(&id).unwrap().unwrap().text, "survives reopen");
    }

    #[test]
    fn missing_salt_on_populated_store_is_rejected() {
        let dir = TempDir::new().unwrap();
        {
            // Write unencrypted data first.
            let plain = MemoryStore::open(dir.path().join("secure.db")).unwrap();
            plain.save(&sample("already here")).unwrap();
        }
        let err = open_encrypted(&dir, "any passphrase").unwrap_err();
        assert!(matches!(err, MeshError::Encryption(_)));
    }

    #[test]
    fn substring_search_works_through_decryption() {
        let dir = TempDir::new().unwrap();
        let store = open_encrypted(&dir, "searchable").unwrap();
        store.save(&sample("the user prefers dark mode")).unwrap();
        store.save(&sample("unrelated note")).unwrap();

        let hits = store.search_by_text("PREFERS", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("dark mode"));
    }

    #[test]
    fn filtered_search_matches_decrypted_metadata() {
        let dir = TempDir::new().unwrap();
        let store = open_encrypted(&dir, "filterable").unwrap();

        let mut tagged = sample("tagged");
        tagged
            .metadata
            .insert("project".into(), Value::String("mesh".into()));
        store.save(&tagged).unwrap();
        store.save(&sample("untagged")).unwrap();

        let mut meta = Metadata::new();
        meta.insert("project".into(), Value::String("mesh".into()));
        let filter = SearchFilter {
            metadata_filter: Some(meta),
            ..Default::default()
        };
        let hits = store.search_filtered(&filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, tagged.id);
    }

    #[test]
    fn filtered_search_still_rejects_bad_keys() {
        let dir = TempDir::new().unwrap();
        let store = open_encrypted(&dir, "strict").unwrap();
        let mut meta = Metadata::new();
        meta.insert("1bad".into(), Value::Bool(true));
        let filter = SearchFilter {
            metadata_filter: Some(meta),
            ..Default::default()
        };
        assert!(matches!(
            store.search_filtered(&filter, 10).unwrap_err(),
            MeshError::InvalidArgument(_)
        ));
    }

    #[test]
    fn update_fields_encrypts_new_text() {
        let dir = TempDir::new().unwrap();
        let store = open_encrypted(&dir, "updatable").unwrap();
        let mem = sample("before update");
        store.save(&mem).unwrap();

        store
            .update_fields(
                &mem.id,
                MemoryPatch {
                    text: Some("after update".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(store.get(&mem.id).unwrap().unwrap().text, "after update");
        let raw = store.inner.get(&mem.id).unwrap().unwrap();
        assert_ne!(raw.text, "after update");
    }

    #[test]
    fn embeddings_stay_plaintext() {
        let dir = TempDir::new().unwrap();
        let store = open_encrypted(&dir, "embeddings").unwrap();
        let mut mem = sample("with vector");
        mem.embedding = Some(vec![0.5, -0.5, 0.25]);
        store.save(&mem).unwrap();

        let raw = store.inner.get(&mem.id).unwrap().unwrap();
        assert_eq!(raw.embedding, Some(vec![0.5, -0.5, 0.25]));

        let scanned = store.scan_with_embeddings(10).unwrap();
        assert_eq!(scanned.len(), 1);
        assert_eq!(scanned[0].text, "with vector");
    }
}
