//! In-process YouTube extraction
//!
//! Fetches the watch page and reads the player response structure straight
//! out of the embedded script, the way the page's own player does. Live
//! content resolves to the HLS manifest; everything else falls back to the
//! highest-bitrate progressive format. No subprocess, no browser; this is
//! the fast path for the dominant platform.

use crate::http::HeaderCaptureClient;
use crate::resolver::{headers, StreamResolver};
use crate::utils::error::ResolverError;
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

const PLAYER_RESPONSE_MARKER: &str = "ytInitialPlayerResponse";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    streaming_data: Option<StreamingData>,
    video_details: Option<VideoDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamingData {
    hls_manifest_url: Option<String>,
    #[serde(default)]
    formats: Vec<PageFormat>,
    #[serde(default)]
    adaptive_formats: Vec<PageFormat>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageFormat {
    url: Option<String>,
    mime_type: Option<String>,
    bitrate: Option<u64>,
    quality_label: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    is_live: Option<bool>,
}

/// Structured extraction from the YouTube watch page
pub struct YoutubePageResolver {
    http: Arc<HeaderCaptureClient>,
}

impl YoutubePageResolver {
    pub fn new(http: Arc<HeaderCaptureClient>) -> Self {
        Self { http }
    }

    fn pick_stream_url(&self, player: &PlayerResponse) -> Option<(String, Option<String>)> {
        let streaming = player.streaming_data.as_ref()?;
        let is_live = player
            .video_details
            .as_ref()
            .and_then(|d| d.is_live)
            .unwrap_or(false);

        // Live (and live-capable) content: the HLS manifest is the stream
        if let Some(hls) = &streaming.hls_manifest_url {
            debug!("Player response carries HLS manifest (live={})", is_live);
            return Some((hls.clone(), None));
        }

        // VOD fallback: muxed formats first, then adaptive, highest bitrate
        // within the mp4 container when available
        let candidates = streaming
            .formats
            .iter()
            .chain(streaming.adaptive_formats.iter())
            .filter(|f| f.url.is_some());

        let best = candidates.max_by_key(|f| {
            let container_bonus = if f
                .mime_type
                .as_deref()
                .map(|m| m.contains("mp4"))
                .unwrap_or(false)
            {
                1u64 << 40
            } else {
                0
            };
            container_bonus + f.bitrate.unwrap_or(0)
        })?;

        Some((best.url.clone()?, best.quality_label.clone()))
    }
}

#[async_trait]
impl StreamResolver for YoutubePageResolver {
    fn name(&self) -> &'static str {
        "youtube-native"
    }

    fn can_resolve(&self, url: &str) -> bool {
        let lowercase = url.to_lowercase();
        lowercase.contains("youtube.com") || lowercase.contains("youtu.be")
    }

    async fn resolve(&self, url: &str) -> Result<String> {
        let page_url = headers::strip_inline(url);
        let page = self
            .http
            .get_text(page_url, &HashMap::new())
            .await
            .map_err(|e| ResolverError::extraction(self.name(), e.to_string()))?;

        let stream = match extract_player_response(&page) {
            Some(player) => self.pick_stream_url(&player),
            None => {
                warn!("No parseable player response; falling back to raw scan");
                scan_hls_manifest(&page).map(|m| (m, None))
            }
        };

        let Some((stream_url, _quality)) = stream else {
            return Err(
                ResolverError::extraction(self.name(), "no stream URL available").into(),
            );
        };

        // Carry the identity this extraction ran with, so playback presents
        // the exact same face to the CDN
        let captured = self.http.captured_headers();
        let mut pairs: Vec<(String, String)> = Vec::new();
        if let Some(ua) = captured.get("User-Agent") {
            pairs.push(("User-Agent".to_string(), ua.clone()));
        }
        if let Some(cookie) = captured.get("Cookie") {
            pairs.push(("Cookie".to_string(), cookie.clone()));
        }
        pairs.push(("Referer".to_string(), "https://www.youtube.com/".to_string()));
        pairs.push(("Origin".to_string(), "https://www.youtube.com".to_string()));

        // Probe with the exact playback headers. Signed URLs sometimes fail
        // HEAD while playing fine, so an HLS-looking URL passes regardless.
        let playback_headers: HashMap<String, String> = pairs.iter().cloned().collect();
        if !self.http.validate_stream(&stream_url, &playback_headers).await
            && !stream_url.contains("googlevideo.com")
            && !stream_url.contains(".m3u8")
        {
            return Err(
                ResolverError::extraction(self.name(), "extracted stream failed validation")
                    .into(),
            );
        }

        Ok(headers::encode_inline(&stream_url, &pairs))
    }

    fn priority(&self) -> i32 {
        150
    }
}

/// Locate and deserialize the `ytInitialPlayerResponse` object embedded in
/// the page script.
fn extract_player_response(page: &str) -> Option<PlayerResponse> {
    let json = extract_json_object(page, PLAYER_RESPONSE_MARKER)?;
    match serde_json::from_str(json) {
        Ok(player) => Some(player),
        Err(e) => {
            warn!("Player response did not deserialize: {}", e);
            None
        }
    }
}

/// Balanced-brace scan for the JSON object assigned after `marker`. The page
/// is minified JS, so a regex over braces is not reliable; this walks the
/// object while tracking string/escape state.
fn extract_json_object<'a>(page: &'a str, marker: &str) -> Option<&'a str> {
    let marker_at = page.find(marker)?;
    let after = &page[marker_at + marker.len()..];
    let brace_at = after.find('{')?;
    let body = &after[brace_at..];

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in body.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Last-resort raw scan for an HLS manifest URL anywhere in the page.
fn scan_hls_manifest(page: &str) -> Option<String> {
    let pattern = Regex::new(r#""hlsManifestUrl"\s*:\s*"([^"]+)""#).ok()?;
    pattern
        .captures(page)
        .map(|c| c[1].replace("\\/", "/").replace('\\', ""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::IdentityStore;
    use std::time::Duration;

    fn resolver() -> YoutubePageResolver {
        let http = HeaderCaptureClient::new(
            Arc::new(IdentityStore::in_memory()),
            vec!["googlevideo.com".to_string()],
            Duration::from_secs(5),
        )
        .expect("client");
        YoutubePageResolver::new(Arc::new(http))
    }

    #[test]
    fn test_can_resolve_platform_domains() {
        let resolver = resolver();
        assert!(resolver.can_resolve("https://www.youtube.com/watch?v=abc"));
        assert!(resolver.can_resolve("https://youtu.be/abc"));
        assert!(resolver.can_resolve("https://www.YouTube.com/@channel/live"));
        assert!(!resolver.can_resolve("https://vimeo.com/123"));
    }

    #[test]
    fn test_extract_json_object_balanced() {
        let page = r#"noise;var ytInitialPlayerResponse = {"a":{"b":"}"},"c":1};more"#;
        let json = extract_json_object(page, "ytInitialPlayerResponse").expect("object");
        assert_eq!(json, r#"{"a":{"b":"}"},"c":1}"#);
    }

    #[test]
    fn test_live_prefers_hls_manifest() {
        let resolver = resolver();
        let player: PlayerResponse = serde_json::from_str(
            r#"{
                "streamingData": {
                    "hlsManifestUrl": "https://manifest.googlevideo.com/file/index.m3u8",
                    "formats": [{"url": "https://cdn/v.mp4", "bitrate": 1000}]
                },
                "videoDetails": {"isLive": true}
            }"#,
        )
        .unwrap();

        let (url, _) = resolver.pick_stream_url(&player).expect("stream");
        assert_eq!(url, "https://manifest.googlevideo.com/file/index.m3u8");
    }

    #[test]
    fn test_vod_picks_highest_bitrate_mp4() {
        let resolver = resolver();
        let player: PlayerResponse = serde_json::from_str(
            r#"{
                "streamingData": {
                    "formats": [
                        {"url": "https://cdn/low.webm", "mimeType": "video/webm", "bitrate": 900000},
                        {"url": "https://cdn/mid.mp4", "mimeType": "video/mp4", "bitrate": 500000, "qualityLabel": "480p"},
                        {"url": "https://cdn/high.mp4", "mimeType": "video/mp4", "bitrate": 800000, "qualityLabel": "720p"}
                    ]
                },
                "videoDetails": {"isLive": false}
            }"#,
        )
        .unwrap();

        let (url, quality) = resolver.pick_stream_url(&player).expect("stream");
        assert_eq!(url, "https://cdn/high.mp4");
        assert_eq!(quality.as_deref(), Some("720p"));
    }

    #[test]
    fn test_ciphered_formats_without_url_are_skipped() {
        let resolver = resolver();
        let player: PlayerResponse = serde_json::from_str(
            r#"{
                "streamingData": {
                    "formats": [{"mimeType": "video/mp4", "bitrate": 1000000}]
                },
                "videoDetails": {}
            }"#,
        )
        .unwrap();

        assert!(resolver.pick_stream_url(&player).is_none());
    }

    #[test]
    fn test_scan_hls_manifest_fallback() {
        let page = r#"..."hlsManifestUrl":"https:\/\/manifest.googlevideo.com\/x\/index.m3u8"..."#;
        assert_eq!(
            scan_hls_manifest(page).as_deref(),
            Some("https://manifest.googlevideo.com/x/index.m3u8")
        );
    }
}
