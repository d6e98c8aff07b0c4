//! Passthrough resolver for links that are already final IPTV formats

use crate::resolver::StreamResolver;
use anyhow::Result;
use async_trait::async_trait;

const DIRECT_EXTENSIONS: [&str; 9] = [
    ".m3u8", ".mpd", ".ts", ".tp", ".m2ts", ".cmf", ".m4s", ".mp4", ".mkv",
];

const DIRECT_PROTOCOLS: [&str; 5] = ["rtsp://", "rtmp://", "udp://", "rtp://", "srt://"];

/// Matches URLs that need no extraction at all: direct media files, raw
/// streaming protocols, and well-known manifest markers. Exists purely to
/// short-circuit the heavier engines.
pub struct DirectLinkResolver;

impl DirectLinkResolver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DirectLinkResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamResolver for DirectLinkResolver {
    fn name(&self) -> &'static str {
        "direct-link"
    }

    fn can_resolve(&self, url: &str) -> bool {
        let lowercase = url.to_lowercase();
        let clean = url.split('?').next().unwrap_or(url).to_lowercase();

        DIRECT_EXTENSIONS.iter().any(|ext| clean.ends_with(ext))
            || DIRECT_PROTOCOLS.iter().any(|proto| lowercase.starts_with(proto))
            || url.contains("m3u8?")
            || url.contains("index.mpd")
            || url.contains("/udp/")
    }

    async fn resolve(&self, url: &str) -> Result<String> {
        // Link is already ready for the player
        Ok(url.to_string())
    }

    fn priority(&self) -> i32 {
        200
    }
}
