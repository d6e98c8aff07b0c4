//! Batch channel resolution
//!
//! Consumes a channels JSON file from the scheduler, resolves each entry
//! through the chain, and produces the same list with playable URLs and
//! per-channel playback headers. Channels run sequentially: it keeps load
//! off the target hosts and guarantees the captured-header accumulator
//! never bleeds between channels.

use crate::http::HeaderCaptureClient;
use crate::resolver::ResolverChain;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Input model: matches the raw `channels.json` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInput {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

/// Output model: enriched resolved channel with all fields the player
/// expects. The original URL is always kept for reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedChannel {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m3u8: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsInput {
    pub channels: Vec<ChannelInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedOutput {
    pub channels: Vec<ResolvedChannel>,
}

/// Sequential batch driver over the resolver chain
pub struct BatchResolver {
    chain: Arc<ResolverChain>,
    http: Arc<HeaderCaptureClient>,
}

impl BatchResolver {
    pub fn new(chain: Arc<ResolverChain>, http: Arc<HeaderCaptureClient>) -> Self {
        Self { chain, http }
    }

    /// Resolve every channel in order. Failures never abort the batch.
    pub async fn run(&self, channels: Vec<ChannelInput>) -> ResolvedOutput {
        let total = channels.len();
        let mut resolved = Vec::with_capacity(total);
        let mut success_count = 0usize;

        for (index, channel) in channels.into_iter().enumerate() {
            info!("[{}/{}] Resolving {}", index + 1, total, channel.name);

            // Fresh accumulator per channel: headers captured while
            // resolving channel A must never leak into channel B
            self.http.clear_captured();

            match self.chain.resolve_channel(&channel.name, &channel.url).await {
                Ok(outcome) => {
                    success_count += 1;

                    // Inline headers from the winning engine take priority;
                    // anything else the capture client observed fills in
                    let mut headers = outcome.headers.iter().cloned().collect::<HashMap<_, _>>();
                    for (key, value) in self.http.captured_headers() {
                        headers.entry(key).or_insert(value);
                    }

                    resolved.push(ResolvedChannel {
                        name: channel.name,
                        url: channel.url,
                        m3u8: Some(outcome.url),
                        logo: channel.logo,
                        group: channel.group,
                        success: true,
                        headers: if headers.is_empty() {
                            None
                        } else {
                            Some(headers)
                        },
                        error: None,
                    });
                }
                Err(e) => {
                    warn!("Channel {} failed: {}", channel.name, e);
                    resolved.push(ResolvedChannel {
                        name: channel.name,
                        url: channel.url,
                        m3u8: None,
                        logo: channel.logo,
                        group: channel.group,
                        success: false,
                        headers: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            "Batch finished: {} succeeded, {} failed",
            success_count,
            total - success_count
        );

        ResolvedOutput { channels: resolved }
    }

    /// Read the channels file the scheduler hands us.
    pub async fn load_channels(path: &Path) -> Result<Vec<ChannelInput>> {
        let raw = tokio::fs::read_to_string(path).await?;
        let input: ChannelsInput = serde_json::from_str(&raw)?;
        Ok(input.channels)
    }

    /// Write the resolved list where the player picks it up.
    pub async fn save_output(path: &Path, output: &ResolvedOutput) -> Result<()> {
        let json = serde_json::to_string_pretty(output)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// Collapse runs of whitespace and trim, keeping the original casing.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// One `#EXTINF` playlist entry with headers appended in the pipe
/// convention players understand.
pub fn generate_m3u_entry(channel: &ResolvedChannel) -> Option<String> {
    let stream_url = channel.m3u8.as_deref()?;
    let clean_name = normalize_name(&channel.name);
    let group = channel.group.as_deref().unwrap_or("General");
    let logo = channel.logo.as_deref().unwrap_or("");

    let final_url = match &channel.headers {
        Some(headers) if !headers.is_empty() => {
            let mut pairs: Vec<(String, String)> =
                headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            pairs.sort();
            crate::resolver::headers::encode_inline(stream_url, &pairs)
        }
        _ => stream_url.to_string(),
    };

    Some(format!(
        "#EXTINF:-1 tvg-name=\"{}\" tvg-logo=\"{}\" group-title=\"{}\",{}\n{}",
        clean_name, logo, group, clean_name, final_url
    ))
}

/// Whole playlist for the resolved channels that succeeded.
pub fn generate_m3u_playlist(output: &ResolvedOutput) -> String {
    let mut playlist = String::from("#EXTM3U\n");
    for channel in &output.channels {
        if let Some(entry) = generate_m3u_entry(channel) {
            playlist.push_str(&entry);
            playlist.push('\n');
        }
    }
    playlist
}
