//! Persistent resolved-link cache
//!
//! Maps an original channel URL to the playable URL that was extracted for
//! it, together with the HTTP headers playback needs and an expiry window.
//! Storage failures are swallowed as cache misses so a broken database never
//! blocks resolution.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Stream container format of a cached link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamFormat {
    Hls,
    Dash,
    Progressive,
    Unknown,
}

impl StreamFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamFormat::Hls => "HLS",
            StreamFormat::Dash => "DASH",
            StreamFormat::Progressive => "PROGRESSIVE",
            StreamFormat::Unknown => "UNKNOWN",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "HLS" => StreamFormat::Hls,
            "DASH" => StreamFormat::Dash,
            "PROGRESSIVE" => StreamFormat::Progressive,
            _ => StreamFormat::Unknown,
        }
    }

    /// Best-effort classification from the shape of a resolved URL.
    pub fn infer(url: &str) -> Self {
        let path = url.split('?').next().unwrap_or(url).to_lowercase();
        if path.ends_with(".m3u8") || url.contains("m3u8?") {
            StreamFormat::Hls
        } else if path.ends_with(".mpd") || url.contains("index.mpd") {
            StreamFormat::Dash
        } else if path.ends_with(".mp4") || path.ends_with(".ts") || path.ends_with(".mkv") {
            StreamFormat::Progressive
        } else {
            StreamFormat::Unknown
        }
    }
}

/// One cached resolution row
#[derive(Debug, Clone)]
pub struct CachedResolution {
    pub original_url: String,
    pub resolved_url: String,
    /// Epoch millis when the link was resolved
    pub captured_at: i64,
    /// Epoch millis after which the link is unusable
    pub expires_at: i64,
    pub quality: Option<String>,
    pub format: StreamFormat,
    pub headers: HashMap<String, String>,
}

impl CachedResolution {
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now().timestamp_millis())
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at
    }

    /// True once the link is old enough that a fresh extraction is worth it,
    /// even if it has not expired yet.
    pub fn needs_update(&self, threshold_hours: i64) -> bool {
        self.needs_update_at(threshold_hours, Utc::now().timestamp_millis())
    }

    pub fn needs_update_at(&self, threshold_hours: i64, now_ms: i64) -> bool {
        let threshold_ms = threshold_hours * 60 * 60 * 1000;
        now_ms - self.captured_at >= threshold_ms
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total: i64,
    pub valid: i64,
    pub expired: i64,
}

/// Resolved-link cache backed by SQLite
pub struct LinkCache {
    pool: Pool<Sqlite>,
}

impl LinkCache {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Exact-key lookup. Expired rows are deleted on read and reported as a
    /// miss. Storage errors also surface as a miss.
    pub async fn get(&self, original_url: &str) -> Option<CachedResolution> {
        let row = match sqlx::query("SELECT * FROM resolved_links WHERE original_url = ?")
            .bind(original_url)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(row) => row?,
            Err(e) => {
                warn!("Cache read failed for {}: {}", original_url, e);
                return None;
            }
        };

        let cached = match row_into_cached_resolution(row) {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Corrupt cache row for {}: {}", original_url, e);
                return None;
            }
        };

        if cached.is_valid() {
            Some(cached)
        } else {
            self.invalidate(original_url).await;
            None
        }
    }

    /// Upsert a resolution with a TTL measured in hours from now.
    /// Write failures are logged and ignored.
    pub async fn put(
        &self,
        original_url: &str,
        resolved_url: &str,
        headers: &HashMap<String, String>,
        quality: Option<&str>,
        format: StreamFormat,
        ttl_hours: i64,
    ) {
        let now = Utc::now().timestamp_millis();
        let expires_at = now + ttl_hours * 60 * 60 * 1000;

        let headers_json = match serde_json::to_string(headers) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize cache headers: {}", e);
                return;
            }
        };

        let result = sqlx::query(
            r#"
            INSERT OR REPLACE INTO resolved_links
            (original_url, resolved_url, captured_at, expires_at, quality, format, headers)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(original_url)
        .bind(resolved_url)
        .bind(now)
        .bind(expires_at)
        .bind(quality)
        .bind(format.as_str())
        .bind(headers_json)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => debug!("Cached resolution for {}", original_url),
            Err(e) => warn!("Cache write failed for {}: {}", original_url, e),
        }
    }

    /// Drop one entry (manual refresh path).
    pub async fn invalidate(&self, original_url: &str) {
        if let Err(e) = sqlx::query("DELETE FROM resolved_links WHERE original_url = ?")
            .bind(original_url)
            .execute(&self.pool)
            .await
        {
            warn!("Cache invalidate failed for {}: {}", original_url, e);
        }
    }

    /// Sweep every expired row. Returns how many were removed.
    pub async fn invalidate_expired(&self, now_ms: i64) -> u64 {
        match sqlx::query("DELETE FROM resolved_links WHERE expires_at <= ?")
            .bind(now_ms)
            .execute(&self.pool)
            .await
        {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                warn!("Expiry sweep failed: {}", e);
                0
            }
        }
    }

    /// True when the entry is old enough for a proactive re-resolution.
    pub fn needs_refresh(&self, cached: &CachedResolution, threshold_hours: i64) -> bool {
        cached.needs_update(threshold_hours)
    }

    /// Original URLs whose cached resolution has crossed the refresh threshold.
    pub async fn urls_needing_update(&self, threshold_hours: i64) -> Vec<String> {
        let cutoff = Utc::now().timestamp_millis() - threshold_hours * 60 * 60 * 1000;
        match sqlx::query("SELECT original_url FROM resolved_links WHERE captured_at <= ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows.iter().map(|r| r.get("original_url")).collect(),
            Err(e) => {
                warn!("Refresh-candidate query failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Row counts for the ops surface.
    pub async fn stats(&self) -> CacheStats {
        let now = Utc::now().timestamp_millis();
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM resolved_links")
            .fetch_one(&self.pool)
            .await
            .unwrap_or(0);
        let valid: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM resolved_links WHERE expires_at > ?")
                .bind(now)
                .fetch_one(&self.pool)
                .await
                .unwrap_or(0);

        CacheStats {
            total,
            valid,
            expired: total - valid,
        }
    }
}

/// Convert database row to cached resolution
fn row_into_cached_resolution(row: sqlx::sqlite::SqliteRow) -> Result<CachedResolution> {
    let headers_json: String = row.get("headers");
    let headers: HashMap<String, String> =
        serde_json::from_str(&headers_json).unwrap_or_default();

    Ok(CachedResolution {
        original_url: row.get("original_url"),
        resolved_url: row.get("resolved_url"),
        captured_at: row.get("captured_at"),
        expires_at: row.get("expires_at"),
        quality: row.get("quality"),
        format: StreamFormat::from_str(row.get::<&str, _>("format")),
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(captured_at: i64, ttl_hours: i64) -> CachedResolution {
        CachedResolution {
            original_url: "https://youtube.com/watch?v=abc".to_string(),
            resolved_url: "https://cdn.example.com/live.m3u8".to_string(),
            captured_at,
            expires_at: captured_at + ttl_hours * 60 * 60 * 1000,
            quality: Some("1080p".to_string()),
            format: StreamFormat::Hls,
            headers: HashMap::new(),
        }
    }

    const HOUR_MS: i64 = 60 * 60 * 1000;

    #[test]
    fn test_ttl_validity_window() {
        let t0 = 1_700_000_000_000;
        let entry = sample_entry(t0, 5);

        assert!(entry.is_valid_at(t0 + 4 * HOUR_MS));
        assert!(!entry.is_valid_at(t0 + 6 * HOUR_MS));
    }

    #[test]
    fn test_needs_update_threshold() {
        let t0 = 1_700_000_000_000;
        let entry = sample_entry(t0, 5);

        assert!(!entry.needs_update_at(5, t0 + 4 * HOUR_MS));
        assert!(entry.needs_update_at(5, t0 + 6 * HOUR_MS));
        // Boundary: exactly at the threshold counts as stale
        assert!(entry.needs_update_at(5, t0 + 5 * HOUR_MS));
    }

    #[test]
    fn test_format_inference() {
        assert_eq!(
            StreamFormat::infer("http://h.example/live/stream.m3u8?token=x"),
            StreamFormat::Hls
        );
        assert_eq!(
            StreamFormat::infer("http://h.example/dash/index.mpd"),
            StreamFormat::Dash
        );
        assert_eq!(
            StreamFormat::infer("http://h.example/vod/movie.mp4"),
            StreamFormat::Progressive
        );
        assert_eq!(
            StreamFormat::infer("http://h.example/watch?v=abc"),
            StreamFormat::Unknown
        );
    }

    #[test]
    fn test_format_round_trip() {
        for format in [
            StreamFormat::Hls,
            StreamFormat::Dash,
            StreamFormat::Progressive,
            StreamFormat::Unknown,
        ] {
            assert_eq!(StreamFormat::from_str(format.as_str()), format);
        }
        assert_eq!(StreamFormat::from_str("garbage"), StreamFormat::Unknown);
    }
}
