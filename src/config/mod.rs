//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Resolver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverSettings {
    /// SQLite database location (resolved-link cache + identity tables)
    pub database_path: PathBuf,

    /// How long a resolved link stays playable before it expires
    pub cache_validity_hours: i64,

    /// Age after which a cached link should be proactively re-resolved
    pub refresh_threshold_hours: i64,

    /// Format selector string handed to the subprocess extractor
    pub preferred_format: String,

    /// Hosts whose traffic carries the anti-403 headers worth capturing
    pub high_value_hosts: Vec<String>,

    /// HTTP connect/read timeout (seconds)
    pub http_timeout_secs: u64,

    /// How long the browser engine may sniff for a manifest (seconds)
    pub browser_timeout_secs: u64,

    /// Hard ceiling for one subprocess extraction (seconds)
    pub ytdlp_timeout_secs: u64,

    /// Session report files kept on disk before rotation
    pub max_report_files: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("m3u-resolver")
                .join("resolver.db"),
            cache_validity_hours: 5,
            refresh_threshold_hours: 5,
            preferred_format: "best".to_string(),
            high_value_hosts: vec!["googlevideo.com".to_string()],
            http_timeout_secs: 15,
            browser_timeout_secs: 28,
            ytdlp_timeout_secs: 90,
            max_report_files: 10,
        }
    }
}

impl ResolverSettings {
    /// Clamp obviously broken values to sane minimums.
    pub fn sanitized(mut self) -> Self {
        if self.cache_validity_hours <= 0 {
            self.cache_validity_hours = 1;
        }
        if self.refresh_threshold_hours <= 0 {
            self.refresh_threshold_hours = 1;
        }
        if self.http_timeout_secs == 0 {
            self.http_timeout_secs = 15;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ResolverSettings::default();
        assert!(config.cache_validity_hours > 0);
        assert!(config.refresh_threshold_hours > 0);
        assert!(!config.preferred_format.is_empty());
        assert!(config
            .high_value_hosts
            .iter()
            .any(|h| h.contains("googlevideo")));
    }

    #[test]
    fn test_sanitized_enforces_minimums() {
        let mut config = ResolverSettings::default();
        config.cache_validity_hours = 0;
        config.http_timeout_secs = 0;

        let config = config.sanitized();
        assert_eq!(config.cache_validity_hours, 1);
        assert_eq!(config.http_timeout_secs, 15);
    }
}
