//! The resolver chain
//!
//! Orders every registered resolver by descending priority and tries each
//! matching one in turn until a playable link comes back. The cache is
//! consulted before any engine runs; successful resolutions are written
//! back with a TTL. Every attempt is recorded, and a total failure triggers
//! a reactive identity refresh without blocking the failure itself.

use crate::cache::{LinkCache, StreamFormat};
use crate::identity::{IdentityStore, TokenRefreshAgent};
use crate::report::{AttemptRecord, ExtractionLogger};
use crate::resolver::{headers::ResolvedLink, StreamResolver};
use crate::utils::error::ResolverError;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Final product of one channel resolution
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    /// Bare playable URL (no inline suffix)
    pub url: String,
    /// Playback headers in encode order
    pub headers: Vec<(String, String)>,
    /// Engine that produced the link ("cache" for cache hits)
    pub engine: String,
    pub from_cache: bool,
}

impl ChannelOutcome {
    /// Re-encode as the pipe convention the playback layer consumes.
    pub fn inline_encoded(&self) -> String {
        crate::resolver::headers::encode_inline(&self.url, &self.headers)
    }
}

pub struct ResolverChain {
    resolvers: Vec<Arc<dyn StreamResolver>>,
    identity: Arc<IdentityStore>,
    logger: Arc<ExtractionLogger>,
    cache: Option<Arc<LinkCache>>,
    cache_ttl_hours: i64,
    refresh: Option<Arc<TokenRefreshAgent>>,
}

impl ResolverChain {
    /// Build a chain over the given resolvers. Sorting is stable, so equal
    /// priorities keep their registration order.
    pub fn new(
        mut resolvers: Vec<Arc<dyn StreamResolver>>,
        identity: Arc<IdentityStore>,
        logger: Arc<ExtractionLogger>,
    ) -> Self {
        resolvers.sort_by_key(|r| std::cmp::Reverse(r.priority()));
        Self {
            resolvers,
            identity,
            logger,
            cache: None,
            cache_ttl_hours: 5,
            refresh: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<LinkCache>, ttl_hours: i64) -> Self {
        self.cache = Some(cache);
        self.cache_ttl_hours = ttl_hours;
        self
    }

    pub fn with_refresh_agent(mut self, agent: Arc<TokenRefreshAgent>) -> Self {
        self.refresh = Some(agent);
        self
    }

    pub fn logger(&self) -> &Arc<ExtractionLogger> {
        &self.logger
    }

    /// Resolve a URL without a channel name attached.
    pub async fn resolve(&self, url: &str) -> Result<ChannelOutcome> {
        self.resolve_channel(url, url).await
    }

    /// Resolve one channel, recording every attempt under `name`.
    pub async fn resolve_channel(&self, name: &str, url: &str) -> Result<ChannelOutcome> {
        if url.trim().is_empty() {
            self.logger
                .log_channel(
                    name,
                    url,
                    false,
                    None,
                    Some("empty URL".to_string()),
                    Vec::new(),
                )
                .await;
            return Err(ResolverError::InvalidUrl("empty URL".to_string()).into());
        }

        // Cache first: a fresh hit skips every engine
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(url).await {
                debug!("Cache hit for {}", name);
                let mut header_pairs: Vec<(String, String)> =
                    cached.headers.into_iter().collect();
                header_pairs.sort();
                return Ok(ChannelOutcome {
                    url: cached.resolved_url,
                    headers: header_pairs,
                    engine: "cache".to_string(),
                    from_cache: true,
                });
            }
        }

        // Stale identity is not an error, but it is worth fixing in the
        // background while this resolution runs on best-effort headers
        if let Some(refresh) = &self.refresh {
            if !self.identity.has_valid_identity() {
                debug!("Identity is stale; triggering proactive refresh");
                refresh.trigger();
            }
        }

        let matching: Vec<&Arc<dyn StreamResolver>> = self
            .resolvers
            .iter()
            .filter(|r| r.can_resolve(url))
            .collect();

        if matching.is_empty() {
            self.logger
                .log_channel(
                    name,
                    url,
                    false,
                    None,
                    Some("no resolver can handle this URL".to_string()),
                    Vec::new(),
                )
                .await;
            return Err(ResolverError::NoCapabilityMatch(url.to_string()).into());
        }

        let user_agent = self.identity.user_agent();
        let mut attempts: Vec<AttemptRecord> = Vec::new();

        for resolver in matching {
            debug!("Trying engine: {}", resolver.name());
            let started = Instant::now();
            let result = resolver.resolve(url).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(encoded) => {
                    let link = ResolvedLink::parse(&encoded);
                    if !is_valid_stream_url(&link.url) {
                        let attempt = AttemptRecord {
                            engine: resolver.name().to_string(),
                            user_agent: user_agent.clone(),
                            success: false,
                            error: Some(format!("non-stream URL returned: {}", link.url)),
                            duration_ms,
                        };
                        self.logger.log_attempt(name, &attempt);
                        attempts.push(attempt);
                        continue;
                    }

                    let attempt = AttemptRecord {
                        engine: resolver.name().to_string(),
                        user_agent: user_agent.clone(),
                        success: true,
                        error: None,
                        duration_ms,
                    };
                    self.logger.log_attempt(name, &attempt);
                    attempts.push(attempt);

                    if let Some(cache) = &self.cache {
                        cache
                            .put(
                                url,
                                &link.url,
                                &link.header_map(),
                                None,
                                StreamFormat::infer(&link.url),
                                self.cache_ttl_hours,
                            )
                            .await;
                    }

                    info!("Resolved {} via {}", name, resolver.name());
                    self.logger
                        .log_channel(
                            name,
                            url,
                            true,
                            Some(resolver.name().to_string()),
                            None,
                            attempts,
                        )
                        .await;

                    return Ok(ChannelOutcome {
                        url: link.url,
                        headers: link.headers,
                        engine: resolver.name().to_string(),
                        from_cache: false,
                    });
                }
                Err(e) => {
                    let attempt = AttemptRecord {
                        engine: resolver.name().to_string(),
                        user_agent: user_agent.clone(),
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms,
                    };
                    self.logger.log_attempt(name, &attempt);
                    attempts.push(attempt);
                }
            }
        }

        // Every engine failed: aggregate the causes, nudge the identity
        let aggregate = attempts
            .iter()
            .map(|a| {
                format!(
                    "{}: {}",
                    a.engine,
                    a.error.as_deref().unwrap_or("unknown error")
                )
            })
            .collect::<Vec<_>>()
            .join("; ");

        warn!("All engines failed for {}: {}", name, aggregate);

        if let Some(refresh) = &self.refresh {
            refresh.trigger();
        }

        self.logger
            .log_channel(name, url, false, None, Some(aggregate.clone()), attempts)
            .await;

        Err(ResolverError::AllResolversFailed(aggregate).into())
    }
}

/// Accepts URLs that look like real streams and rejects analytics noise.
/// Direct streaming protocols always pass; the rest must show a manifest
/// extension, a manifest-ish path, or an auth token.
pub fn is_valid_stream_url(url: &str) -> bool {
    let lowercase = url.to_lowercase();

    let is_direct_protocol = ["rtsp://", "rtmp://", "udp://", "rtp://", "srt://"]
        .iter()
        .any(|p| lowercase.starts_with(p))
        || url.contains("/udp/");

    let has_stream_extension = [".m3u8", ".mpd", ".ts", ".mp4"]
        .iter()
        .any(|ext| lowercase.contains(ext));

    let is_manifest_path = ["/manifest", "/playlist", "/live/", "/hls/", "/stream/"]
        .iter()
        .any(|marker| lowercase.contains(marker));

    let has_stream_token = ["token=", "sig=", "key="]
        .iter()
        .any(|marker| lowercase.contains(marker));

    let is_stats_endpoint =
        url.contains("youtube.com/api/stats") || url.contains("/api/stats/qoe");

    (is_direct_protocol || has_stream_extension || is_manifest_path || has_stream_token)
        && !is_stats_endpoint
}
