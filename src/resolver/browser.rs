//! Browser-automation resolver
//!
//! Loads the channel page in a headless browser with response sniffing and
//! waits for an HLS manifest request to appear in the network traffic. The
//! rendering engine itself is an embedder-provided capability behind
//! [`BrowserEngine`](crate::browser::BrowserEngine).

use crate::browser::BrowserEngine;
use crate::resolver::{headers, StreamResolver};
use crate::utils::error::ResolverError;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct BrowserSniffResolver {
    engine: Arc<dyn BrowserEngine>,
    timeout: Duration,
}

impl BrowserSniffResolver {
    pub fn new(engine: Arc<dyn BrowserEngine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }
}

#[async_trait]
impl StreamResolver for BrowserSniffResolver {
    fn name(&self) -> &'static str {
        "browser-sniff"
    }

    fn can_resolve(&self, url: &str) -> bool {
        let lowercase = url.to_lowercase();
        lowercase.contains("youtube.com")
            || lowercase.contains("youtu.be")
            || lowercase.contains("/live")
    }

    async fn resolve(&self, url: &str) -> Result<String> {
        let page_url = headers::strip_inline(url);
        let sniffed = self
            .engine
            .sniff_manifest(page_url, self.timeout)
            .await
            .map_err(|e| ResolverError::extraction(self.name(), e.to_string()))?;

        info!("Sniffed manifest: {}", truncate(&sniffed.manifest_url, 70));

        let mut pairs: Vec<(String, String)> = Vec::new();
        pairs.push(("User-Agent".to_string(), sniffed.user_agent.clone()));
        if let Some(cookies) = sniffed.cookies.as_deref().filter(|c| !c.trim().is_empty()) {
            pairs.push(("Cookie".to_string(), cookies.to_string()));
        }
        // Referer guards against 403s on some CDN edges
        pairs.push(("Referer".to_string(), page_url.to_string()));

        Ok(headers::encode_inline(&sniffed.manifest_url, &pairs))
    }

    fn priority(&self) -> i32 {
        100
    }
}

fn truncate(value: &str, max: usize) -> &str {
    match value.char_indices().nth(max) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserIdentity, SniffedManifest};
    use crate::resolver::ResolvedLink;

    struct ScriptedEngine {
        manifest: Option<SniffedManifest>,
    }

    #[async_trait]
    impl BrowserEngine for ScriptedEngine {
        async fn sniff_manifest(&self, _url: &str, _timeout: Duration) -> Result<SniffedManifest> {
            self.manifest
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no manifest observed within timeout"))
        }

        async fn collect_identity(&self, _timeout: Duration) -> Result<BrowserIdentity> {
            Ok(BrowserIdentity::default())
        }
    }

    #[tokio::test]
    async fn test_sniffed_manifest_carries_session_headers() {
        let resolver = BrowserSniffResolver::new(
            Arc::new(ScriptedEngine {
                manifest: Some(SniffedManifest {
                    manifest_url: "https://manifest.googlevideo.com/x/index.m3u8".to_string(),
                    user_agent: "BrowserUA/1.0".to_string(),
                    cookies: Some("sid=live".to_string()),
                }),
            }),
            Duration::from_secs(5),
        );

        let resolved = resolver
            .resolve("https://www.youtube.com/@chan/live")
            .await
            .expect("resolve");

        let link = ResolvedLink::parse(&resolved);
        assert_eq!(link.url, "https://manifest.googlevideo.com/x/index.m3u8");
        let map = link.header_map();
        assert_eq!(map["User-Agent"], "BrowserUA/1.0");
        assert_eq!(map["Cookie"], "sid=live");
        assert_eq!(map["Referer"], "https://www.youtube.com/@chan/live");
    }

    #[tokio::test]
    async fn test_referer_strips_existing_header_suffix() {
        let resolver = BrowserSniffResolver::new(
            Arc::new(ScriptedEngine {
                manifest: Some(SniffedManifest {
                    manifest_url: "https://cdn.example/live.m3u8".to_string(),
                    user_agent: "UA".to_string(),
                    cookies: None,
                }),
            }),
            Duration::from_secs(5),
        );

        let resolved = resolver
            .resolve("https://www.youtube.com/watch?v=a|User-Agent=old")
            .await
            .expect("resolve");

        let link = ResolvedLink::parse(&resolved);
        assert_eq!(
            link.header_map()["Referer"],
            "https://www.youtube.com/watch?v=a"
        );
    }

    #[tokio::test]
    async fn test_sniff_timeout_becomes_error() {
        let resolver = BrowserSniffResolver::new(
            Arc::new(ScriptedEngine { manifest: None }),
            Duration::from_secs(5),
        );

        let err = resolver
            .resolve("https://www.youtube.com/watch?v=a")
            .await
            .expect_err("should fail");
        assert!(err.to_string().contains("browser-sniff"));
    }

    #[test]
    fn test_live_path_matches_outside_platform_domains() {
        let resolver = BrowserSniffResolver::new(
            Arc::new(ScriptedEngine { manifest: None }),
            Duration::from_secs(5),
        );
        assert!(resolver.can_resolve("https://tv.example.org/channel/live"));
        assert!(!resolver.can_resolve("https://tv.example.org/guide"));
    }
}
