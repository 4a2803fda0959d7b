//! Pluggable embedding providers.
//!
//! A provider turns text into a fixed-dimension vector of f32, or signals
//! [`Unavailable`] so the engine degrades to keyword search. Failure is a
//! value, not an exception: providers never surface transport errors to the
//! orchestrator.

pub mod http;
pub mod local;

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{MeshError, Result};

/// Marker returned when a provider cannot produce a vector right now
/// (no model configured, remote endpoint down, timeout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unavailable;

/// Outcome of an embedding call.
pub type EmbedResult = std::result::Result<Vec<f32>, Unavailable>;

/// Capability contract for all embedding providers.
///
/// Implementations must be internally thread-safe; the orchestrator calls
/// them from multiple threads without extra locking.
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name, for logs and diagnostics.
    fn name(&self) -> &str;

    /// Embed a single text into a vector, or report unavailability.
    fn embed(&self, text: &str) -> EmbedResult;

    /// Vector dimension, or `None` when unknown until the first success.
    fn dimension(&self) -> Option<usize>;
}

/// Provider that never produces vectors. Keyword search only.
#[derive(Debug, Default)]
pub struct NoopEmbedding;

impl EmbeddingProvider for NoopEmbedding {
    fn name(&self) -> &str {
        "none"
    }

    fn embed(&self, _text: &str) -> EmbedResult {
        Err(Unavailable)
    }

    fn dimension(&self) -> Option<usize> {
        Some(0)
    }
}

/// Provider-specific options passed to factories.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EmbeddingOptions {
    /// Model identifier, where the provider has a notion of models.
    pub model: Option<String>,
    /// Base URL for remote providers.
    pub base_url: Option<String>,
    /// Bearer token for remote providers that require one.
    pub api_key: Option<String>,
}

/// Factory closure registered under a provider name.
pub type ProviderFactory =
    Box<dyn Fn(&EmbeddingOptions) -> Result<Box<dyn EmbeddingProvider>> + Send + Sync>;

/// Name-keyed registry of provider factories.
///
/// The built-in variants (`none`, `local`, `external-http`) are always
/// present; [`ProviderRegistry::register`] adds new ones without touching
/// the core. The active provider is chosen once, at orchestrator
/// construction.
pub struct ProviderRegistry {
    factories: HashMap<String, ProviderFactory>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("none", |_| Ok(Box::new(NoopEmbedding)));
        registry.register("noop", |_| Ok(Box::new(NoopEmbedding)));
        registry.register("local", |_| Ok(Box::new(local::LocalEmbedding::default())));
        registry.register("external-http", |opts| {
            Ok(Box::new(http::HttpEmbedding::new(opts)?))
        });
        registry
    }
}

impl ProviderRegistry {
    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&EmbeddingOptions) -> Result<Box<dyn EmbeddingProvider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Build a provider by name.
    pub fn create(
        &self,
        name: &str,
        options: &EmbeddingOptions,
    ) -> Result<Box<dyn EmbeddingProvider>> {
        let key = name.trim().to_lowercase();
        let factory = self.factories.get(&key).ok_or_else(|| {
            let mut known: Vec<&str> = self.factories.keys().map(String::as_str).collect();
            known.sort_unstable();
            MeshError::invalid(format!(
                "unknown embedding provider {name:?}; supported: {}",
                known.join(", ")
            ))
        })?;
        factory(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_is_always_unavailable() {
        let provider = NoopEmbedding;
        assert_eq!(provider.embed("anything"), Err(Unavailable));
        assert_eq!(provider.dimension(), Some(0));
    }

    #[test]
    fn registry_builds_builtins() {
        let registry = ProviderRegistry::default();
        let opts = EmbeddingOptions::default();
        assert_eq!(registry.create("none", &opts).unwrap().name(), "none");
        assert_eq!(registry.create("local", &opts).unwrap().name(), "local");
        assert_eq!(registry.create("LOCAL ", &opts).unwrap().name(), "local");
    }

    #[test]
    fn registry_rejects_unknown_name() {
        let registry = ProviderRegistry::default();
        let err = match registry.create("quantum", &EmbeddingOptions::default()) {
            Err(e) => e,
            Ok(_) => panic!("expected registry.create to fail for an unknown provider name"),
        };
        assert!(err.to_string().contains("quantum"));
    }

    #[test]
    fn registry_accepts_custom_factories() {
        struct Fixed;
        impl EmbeddingProvider for Fixed {
            fn name(&self) -> &str {
                "fixed"
            }
            fn embed(&self, _text: &str) -> EmbedResult {
                Ok(vec![1.0, 0.0])
            }
            fn dimension(&self) -> Option<usize> {
                Some(2)
            }
        }

        let mut registry = ProviderRegistry::default();
        registry.register("fixed", |_| Ok(Box::new(Fixed)));
        let provider = registry
            .create("fixed", &EmbeddingOptions::default())
            .unwrap();
        assert_eq!(provider.embed("x"), Ok(vec![1.0, 0.0]));
    }
}
