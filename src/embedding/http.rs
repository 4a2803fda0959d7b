//! External HTTP embedding provider.
//!
//! Posts `{"model": ..., "input": text}` to a configured endpoint and
//! accepts either an `{"embeddings": [[..]]}` payload or the OpenAI-style
//! `{"data": [{"embedding": [..]}]}` shape. Every transport problem —
//! connect failure, timeout, non-2xx status, malformed body — degrades to
//! [`Unavailable`] after a single WARN, never an error: the engine falls
//! back to keyword search.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::{EmbedResult, EmbeddingOptions, EmbeddingProvider, Unavailable};
use crate::error::{MeshError, Result};

/// Wall-clock bound for one embedding call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Embedding client for a remote HTTP service.
#[derive(Debug)]
pub struct HttpEmbedding {
    client: Client,
    url: Url,
    model: Option<String>,
    api_key: Option<String>,
    /// Dimension observed on the first successful call; 0 = not yet known.
    dimension: AtomicUsize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Option<Vec<Vec<f32>>>,
    #[serde(default)]
    data: Option<Vec<EmbedDatum>>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
}

impl HttpEmbedding {
    /// Build a provider from [`EmbeddingOptions`]. Requires `base_url`.
    pub fn new(options: &EmbeddingOptions) -> Result<Self> {
        let base = options
            .base_url
            .as_deref()
            .ok_or_else(|| MeshError::invalid("external-http provider requires a base_url"))?;
        let url = Url::parse(base)
            .map_err(|e| MeshError::invalid(format!("bad embedding base_url {base:?}: {e}")))?;

        check_url_safety(&url)?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MeshError::invalid(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            model: options.model.clone(),
            api_key: options.api_key.clone(),
            dimension: AtomicUsize::new(0),
        })
    }
}

impl EmbeddingProvider for HttpEmbedding {
    fn name(&self) -> &str {
        "external-http"
    }

    fn embed(&self, text: &str) -> EmbedResult {
        let mut payload = json!({ "input": text });
        if let Some(model) = &self.model {
            payload["model"] = json!(model);
        }

        let mut request = self.client.post(self.url.clone()).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send() {
            Ok(resp) => resp,
            Err(e) => {
                warn!(url = %self.url, error = %e, "embedding request failed, falling back to keyword search");
                return Err(Unavailable);
            }
        };

        if !response.status().is_success() {
            warn!(url = %self.url, status = %response.status(), "embedding service returned an error status");
            return Err(Unavailable);
        }

        let body: EmbedResponse = match response.json() {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %self.url, error = %e, "embedding response was not valid JSON");
                return Err(Unavailable);
            }
        };

        let vector = body
            .embeddings
            .and_then(|mut v| (!v.is_empty()).then(|| v.remove(0)))
            .or_else(|| {
                body.data
                    .and_then(|mut d| (!d.is_empty()).then(|| d.remove(0).embedding))
            });

        match vector {
            Some(v) if !v.is_empty() && v.iter().all(|x| x.is_finite()) => {
                self.dimension.store(v.len(), Ordering::Relaxed);
                Ok(v)
            }
            _ => {
                warn!(url = %self.url, "embedding response had no usable vector");
                Err(Unavailable)
            }
        }
    }

    fn dimension(&self) -> Option<usize> {
        match self.dimension.load(Ordering::Relaxed) {
            0 => None,
            dim => Some(dim),
        }
    }
}

/// Reject endpoints that point at link-local / cloud-metadata addresses and
/// warn about plaintext HTTP to anything other than the local host.
fn check_url_safety(url: &Url) -> Result<()> {
    let host = url
        .host_str()
        .ok_or_else(|| MeshError::invalid("embedding base_url has no host"))?;

    let link_local = match host.parse::<std::net::IpAddr>() {
        Ok(std::net::IpAddr::V4(v4)) => v4.is_link_local(),
        Ok(std::net::IpAddr::V6(v6)) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        Err(_) => false,
    };
    if link_local || host == "metadata.google.internal" {
        return Err(MeshError::invalid(format!(
            "embedding base_url host {host:?} looks like a metadata/link-local address"
        )));
    }

    let is_local = matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]");
    if url.scheme() == "http" && !is_local {
        warn!(url = %url, "embedding endpoint uses plain HTTP to a non-local host; text will transit unencrypted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(base_url: &str) -> EmbeddingOptions {
        EmbeddingOptions {
            base_url: Some(base_url.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn requires_base_url() {
        let err = HttpEmbedding::new(&EmbeddingOptions::default()).unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn rejects_metadata_addresses() {
        assert!(HttpEmbedding::new(&opts("http://169.254.169.254/latest")).is_err());
        assert!(HttpEmbedding::new(&opts("http://metadata.google.internal/token")).is_err());
        assert!(HttpEmbedding::new(&opts("http://169.254.0.7/embed")).is_err());
    }

    #[test]
    fn accepts_localhost_and_https() {
        assert!(HttpEmbedding::new(&opts("http://localhost:11434/api/embed")).is_ok());
        assert!(HttpEmbedding::new(&opts("http://127.0.0.1:8080/embed")).is_ok());
        assert!(HttpEmbedding::new(&opts("https://api.example.com/v1/embeddings")).is_ok());
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(HttpEmbedding::new(&opts("not a url")).is_err());
    }

    #[test]
    fn unreachable_endpoint_degrades_to_unavailable() {
        // Port 9 (discard) on localhost is almost certainly closed; either
        // way the call must come back Unavailable, never panic or error.
        let provider = HttpEmbedding::new(&opts("http://127.0.0.1:9/embed")).unwrap();
        assert_eq!(provider.embed("text"), Err(Unavailable));
        assert_eq!(provider.dimension(), None);
    }

    #[test]
    fn parses_both_response_shapes() {
        let ollama: EmbedResponse =
            serde_json::from_str(r#"{"embeddings": [[0.1, 0.2]]}"#).unwrap();
        assert_eq!(ollama.embeddings.unwrap()[0], vec![0.1, 0.2]);

        let openai: EmbedResponse =
            serde_json::from_str(r#"{"data": [{"embedding": [0.3, 0.4], "index": 0}]}"#).unwrap();
        assert_eq!(openai.data.unwrap()[0].embedding, vec![0.3, 0.4]);
    }
}
