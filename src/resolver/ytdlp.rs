//! yt-dlp fallback resolver
//!
//! The catch-all engine: slowest, heaviest, maximally compatible. Invokes
//! the yt-dlp binary with the user's format selector and turns its JSON
//! output into a playable link with inline headers.

use crate::resolver::{headers, StreamResolver};
use crate::utils::error::ResolverError;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};

const ENGINE_NAME: &str = "ytdlp-fallback";

/// Subprocess extraction via yt-dlp
pub struct YtDlpResolver {
    ytdlp_path: PathBuf,
    format: String,
    timeout: Duration,
}

impl YtDlpResolver {
    /// Initialize and verify yt-dlp availability.
    ///
    /// Search order:
    /// 1. System PATH
    /// 2. Common installation paths
    pub fn new(format: &str, timeout: Duration) -> Result<Self> {
        let ytdlp_path = match find_ytdlp() {
            Some(path) => {
                info!("Found yt-dlp at: {}", path.display());
                path
            }
            None => {
                warn!("yt-dlp not found anywhere");
                return Err(ResolverError::YtDlpNotFound.into());
            }
        };

        Ok(Self {
            ytdlp_path,
            format: format.to_string(),
            timeout,
        })
    }

    /// Use an explicit binary path (embedders, tests).
    pub fn with_path(ytdlp_path: PathBuf, format: &str, timeout: Duration) -> Self {
        Self {
            ytdlp_path,
            format: format.to_string(),
            timeout,
        }
    }

    pub fn ytdlp_path(&self) -> &PathBuf {
        &self.ytdlp_path
    }
}

#[async_trait]
impl StreamResolver for YtDlpResolver {
    fn name(&self) -> &'static str {
        ENGINE_NAME
    }

    fn can_resolve(&self, _url: &str) -> bool {
        // yt-dlp tries almost anything the other engines did not handle
        true
    }

    async fn resolve(&self, url: &str) -> Result<String> {
        let page_url = headers::strip_inline(url);
        debug!("Invoking yt-dlp for: {}", page_url);

        let output = tokio::time::timeout(
            self.timeout,
            AsyncCommand::new(&self.ytdlp_path)
                .arg("--dump-json")
                .arg("--no-download")
                .arg("--no-warnings")
                .arg("-f")
                .arg(&self.format)
                .arg(page_url)
                .output(),
        )
        .await
        .map_err(|_| {
            ResolverError::extraction(
                ENGINE_NAME,
                format!("timed out after {}s", self.timeout.as_secs()),
            )
        })??;

        if !output.status.success() {
            let error_msg = String::from_utf8_lossy(&output.stderr);
            return Err(
                ResolverError::extraction(ENGINE_NAME, error_msg.trim().to_string()).into(),
            );
        }

        let json_str = String::from_utf8(output.stdout)
            .map_err(|e| ResolverError::extraction(ENGINE_NAME, e.to_string()))?;

        parse_extraction_output(&json_str)
    }

    fn priority(&self) -> i32 {
        10
    }
}

/// Turn one yt-dlp JSON document into an inline-encoded link.
fn parse_extraction_output(json_str: &str) -> Result<String> {
    let value: Value = serde_json::from_str(json_str.trim())
        .map_err(|e| ResolverError::extraction(ENGINE_NAME, format!("bad JSON: {}", e)))?;

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Err(ResolverError::extraction(ENGINE_NAME, error.to_string()).into());
    }

    let final_url = value
        .get("url")
        .and_then(Value::as_str)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ResolverError::extraction(ENGINE_NAME, "empty final URL in output"))?;

    let mut pairs: Vec<(String, String)> = Vec::new();
    if let Some(header_obj) = value.get("http_headers").and_then(Value::as_object) {
        for (key, header_value) in header_obj {
            if let Some(header_value) = header_value.as_str() {
                pairs.push((key.clone(), header_value.to_string()));
            }
        }
    }

    Ok(headers::encode_inline(final_url, &pairs))
}

// ============================================================
// yt-dlp Detection Functions
// ============================================================

/// Find yt-dlp binary with priority:
/// 1. System PATH
/// 2. Common installation paths
pub fn find_ytdlp() -> Option<PathBuf> {
    if let Some(system) = find_in_path() {
        return Some(system);
    }

    if let Some(common) = find_in_common_paths() {
        return Some(common);
    }

    None
}

/// Find yt-dlp in system PATH
fn find_in_path() -> Option<PathBuf> {
    if let Ok(path) = which::which("yt-dlp") {
        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Find yt-dlp in common installation paths
fn find_in_common_paths() -> Option<PathBuf> {
    let common_paths = [
        "/usr/local/bin/yt-dlp",
        "/usr/bin/yt-dlp",
        "/opt/homebrew/bin/yt-dlp",
        "~/.local/bin/yt-dlp",
    ];

    for path_str in common_paths {
        let expanded = if let Some(rest) = path_str.strip_prefix("~/") {
            match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => PathBuf::from(path_str),
            }
        } else {
            PathBuf::from(path_str)
        };

        if expanded.exists() && is_executable(&expanded) {
            return Some(expanded);
        }
    }

    None
}

/// Check if a file is executable
fn is_executable(path: &PathBuf) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Ok(metadata) = std::fs::metadata(path) {
            let permissions = metadata.permissions();
            return permissions.mode() & 0o111 != 0;
        }
        false
    }

    #[cfg(not(unix))]
    {
        path.exists()
    }
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolvedLink;

    #[test]
    fn test_find_ytdlp() {
        let result = find_ytdlp();
        println!("yt-dlp found at: {:?}", result);
        // Don't assert - yt-dlp might not be installed in CI
    }

    #[test]
    fn test_is_executable() {
        let path = PathBuf::from("/bin/ls");
        if path.exists() {
            assert!(is_executable(&path));
        }
    }

    #[test]
    fn test_parse_success_with_headers() {
        let json = r#"{
            "url": "https://cdn.example/live.m3u8",
            "http_headers": {
                "User-Agent": "UA/1.0",
                "Cookie": "sid=1"
            }
        }"#;

        let encoded = parse_extraction_output(json).expect("parse");
        let link = ResolvedLink::parse(&encoded);
        assert_eq!(link.url, "https://cdn.example/live.m3u8");
        assert_eq!(link.header_map()["User-Agent"], "UA/1.0");
        assert_eq!(link.header_map()["Cookie"], "sid=1");
    }

    #[test]
    fn test_parse_success_without_headers() {
        let json = r#"{"url": "https://cdn.example/direct.mp4"}"#;
        let encoded = parse_extraction_output(json).expect("parse");
        assert_eq!(encoded, "https://cdn.example/direct.mp4");
    }

    #[test]
    fn test_parse_error_field_fails_with_message() {
        let json = r#"{"error": "Video unavailable"}"#;
        let err = parse_extraction_output(json).expect_err("should fail");
        assert!(err.to_string().contains("Video unavailable"));
    }

    #[test]
    fn test_parse_empty_url_fails() {
        let json = r#"{"url": ""}"#;
        let err = parse_extraction_output(json).expect_err("should fail");
        assert!(err.to_string().contains("empty final URL"));
    }

    #[test]
    fn test_catch_all_capability() {
        let resolver = YtDlpResolver::with_path(
            PathBuf::from("/nonexistent/yt-dlp"),
            "best",
            Duration::from_secs(5),
        );
        assert!(resolver.can_resolve("https://anything.example/whatever"));
        assert!(resolver.can_resolve("not-even-a-url"));
    }
}
