//! Cross-process extraction contract
//!
//! The host player talks to this service across a process boundary; the
//! transport itself (binder, socket, whatever the embedder uses) is not our
//! business. What is ours: a versioned request/response schema and the
//! service logic behind it. Callers check `version()` against what they
//! were built for before trusting the payloads.

use crate::http::HeaderCaptureClient;
use crate::resolver::ResolverChain;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Bumped on any incompatible payload change
pub const CONTRACT_VERSION: i32 = 1;

/// A single-URL extraction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub url: String,
}

/// Successful extraction payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionData {
    pub m3u8_url: String,
    pub user_agent: String,
    pub cookies: String,
    /// Full anti-403 header map, JSON-serialized
    pub headers_json: String,
}

/// Headless extraction service behind the process boundary
pub struct ExtractionService {
    chain: Arc<ResolverChain>,
    http: Arc<HeaderCaptureClient>,
}

impl ExtractionService {
    pub fn new(chain: Arc<ResolverChain>, http: Arc<HeaderCaptureClient>) -> Self {
        Self { chain, http }
    }

    /// Contract version for caller compatibility checks.
    pub fn version(&self) -> i32 {
        CONTRACT_VERSION
    }

    /// Extract the playable stream for one URL. Identity staleness and
    /// refresh triggering are handled inside the chain; a failure here is
    /// already the aggregate of every engine's attempt.
    pub async fn extract_stream(&self, request: &ExtractionRequest) -> Result<ExtractionData> {
        debug!("extract_stream called for: {}", request.url);

        // Fresh capture state for this extraction
        self.http.clear_captured();

        let outcome = self.chain.resolve(&request.url).await?;

        // The winning engine's inline headers come first; whatever the
        // capture client observed during the handshake fills the gaps
        let mut headers = outcome
            .headers
            .iter()
            .cloned()
            .collect::<std::collections::HashMap<_, _>>();
        for (key, value) in self.http.captured_headers() {
            headers.entry(key).or_insert(value);
        }

        let user_agent = headers
            .get("User-Agent")
            .cloned()
            .unwrap_or_else(|| crate::http::DEFAULT_USER_AGENT.to_string());
        let cookies = headers.get("Cookie").cloned().unwrap_or_default();
        let headers_json = serde_json::to_string(&headers)?;

        Ok(ExtractionData {
            m3u8_url: outcome.url,
            user_agent,
            cookies,
            headers_json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityStore;
    use crate::report::ExtractionLogger;
    use crate::resolver::DirectLinkResolver;
    use std::collections::HashMap;
    use std::time::Duration;

    fn service() -> ExtractionService {
        let identity = Arc::new(IdentityStore::in_memory());
        let http = Arc::new(
            HeaderCaptureClient::new(
                Arc::clone(&identity),
                vec!["googlevideo.com".to_string()],
                Duration::from_secs(5),
            )
            .expect("client"),
        );
        let chain = ResolverChain::new(
            vec![Arc::new(DirectLinkResolver::new())],
            identity,
            Arc::new(ExtractionLogger::new()),
        );
        ExtractionService::new(Arc::new(chain), http)
    }

    #[test]
    fn test_contract_version_is_stable() {
        assert_eq!(service().version(), 1);
    }

    #[tokio::test]
    async fn test_extract_stream_returns_payload() {
        let service = service();
        let data = service
            .extract_stream(&ExtractionRequest {
                url: "http://h.example/live/stream.m3u8?token=abc".to_string(),
            })
            .await
            .expect("extract");

        assert_eq!(data.m3u8_url, "http://h.example/live/stream.m3u8?token=abc");
        // Direct links carry no headers, so the defaults apply
        assert!(!data.user_agent.is_empty());
        let headers: HashMap<String, String> =
            serde_json::from_str(&data.headers_json).expect("headers json");
        assert!(headers.is_empty() || headers.contains_key("User-Agent"));
    }

    #[tokio::test]
    async fn test_extract_stream_error_carries_causes() {
        let service = service();
        let err = service
            .extract_stream(&ExtractionRequest {
                url: "https://example.com/not-a-stream".to_string(),
            })
            .await
            .expect_err("should fail");
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn test_request_payload_round_trip() {
        let request = ExtractionRequest {
            url: "https://www.youtube.com/watch?v=abc".to_string(),
        };
        let json = serde_json::to_string(&request).expect("serialize");
        let back: ExtractionRequest = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.url, request.url);
    }
}
