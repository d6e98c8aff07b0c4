//! Extraction logging and session reports
//!
//! One record per resolver attempt, one per channel, accumulated for the
//! current session under a single mutex so many concurrently-resolving
//! channels never lose records. The session report is recomputed from the
//! records on demand and never stored.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One resolver try
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub engine: String,
    pub user_agent: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Final outcome for one channel
#[derive(Debug, Clone)]
pub struct ChannelRecord {
    pub name: String,
    pub url: String,
    pub success: bool,
    /// Engine that produced the winning link
    pub engine: Option<String>,
    pub error: Option<String>,
    pub attempts: Vec<AttemptRecord>,
    pub timestamp: i64,
}

/// Derived session summary
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: i64,
    pub started_at: i64,
    pub ended_at: i64,
    pub total_channels: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub channels: Vec<ChannelRecord>,
    /// Successful channel count per winning engine
    pub engine_stats: HashMap<String, usize>,
}

struct LoggerState {
    session_id: i64,
    started_at: i64,
    channels: Vec<ChannelRecord>,
}

/// Session-scoped extraction logger
pub struct ExtractionLogger {
    state: Mutex<LoggerState>,
}

impl ExtractionLogger {
    pub fn new() -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            state: Mutex::new(LoggerState {
                session_id: now,
                started_at: now,
                channels: Vec::new(),
            }),
        }
    }

    /// Record one resolver try. Attempts travel with their channel record;
    /// this only narrates progress.
    pub fn log_attempt(&self, channel_name: &str, attempt: &AttemptRecord) {
        let mark = if attempt.success { "ok" } else { "failed" };
        debug!(
            "[{}] {}: {} ({}ms)",
            attempt.engine, channel_name, mark, attempt.duration_ms
        );
        if let Some(error) = &attempt.error {
            debug!("  reason: {}", error);
        }
    }

    /// Record the final outcome of one channel.
    pub async fn log_channel(
        &self,
        name: &str,
        url: &str,
        success: bool,
        engine: Option<String>,
        error: Option<String>,
        attempts: Vec<AttemptRecord>,
    ) {
        let record = ChannelRecord {
            name: name.to_string(),
            url: url.to_string(),
            success,
            engine: engine.clone(),
            error,
            attempts,
            timestamp: Utc::now().timestamp_millis(),
        };

        let mut state = self.state.lock().await;
        state.channels.push(record);

        if success {
            info!("SUCCESS: {} ({})", name, engine.as_deref().unwrap_or("unknown"));
        } else {
            info!("FAILED: {}", name);
        }
    }

    /// Compute the session report from the accumulated records.
    pub async fn generate_report(&self) -> SessionReport {
        let state = self.state.lock().await;
        let success_count = state.channels.iter().filter(|c| c.success).count();
        let fail_count = state.channels.len() - success_count;

        let mut engine_stats: HashMap<String, usize> = HashMap::new();
        for channel in state.channels.iter().filter(|c| c.success) {
            if let Some(engine) = &channel.engine {
                *engine_stats.entry(engine.clone()).or_insert(0) += 1;
            }
        }

        SessionReport {
            session_id: state.session_id,
            started_at: state.started_at,
            ended_at: Utc::now().timestamp_millis(),
            total_channels: state.channels.len(),
            success_count,
            fail_count,
            channels: state.channels.clone(),
            engine_stats,
        }
    }

    /// Human-readable session report.
    pub async fn format_report_as_text(&self) -> String {
        let report = self.generate_report().await;
        let duration_s = (report.ended_at - report.started_at) / 1000;
        let session_time = Utc
            .timestamp_millis_opt(report.session_id)
            .single()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let pct = |count: usize| {
            if report.total_channels == 0 {
                0
            } else {
                count * 100 / report.total_channels
            }
        };

        let mut out = String::new();
        out.push_str("=======================================================\n");
        out.push_str("            STREAM EXTRACTION REPORT\n");
        out.push_str("=======================================================\n\n");
        out.push_str(&format!("Session:  {}\n", session_time));
        out.push_str(&format!("Duration: {}s\n\n", duration_s));
        out.push_str(&format!("Total channels: {}\n", report.total_channels));
        out.push_str(&format!(
            "Succeeded: {} ({}%)\n",
            report.success_count,
            pct(report.success_count)
        ));
        out.push_str(&format!(
            "Failed:    {} ({}%)\n\n",
            report.fail_count,
            pct(report.fail_count)
        ));

        if !report.engine_stats.is_empty() {
            out.push_str("Engines:\n");
            let mut stats: Vec<_> = report.engine_stats.iter().collect();
            stats.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
            for (engine, count) in stats {
                out.push_str(&format!("  {}: {} channels\n", engine, count));
            }
            out.push('\n');
        }

        if report.success_count > 0 {
            out.push_str(&format!("SUCCEEDED ({})\n", report.success_count));
            for channel in report.channels.iter().filter(|c| c.success) {
                out.push_str(&format!(
                    "  - {} [{}]\n",
                    channel.name,
                    channel.engine.as_deref().unwrap_or("unknown")
                ));
            }
            out.push('\n');
        }

        if report.fail_count > 0 {
            out.push_str(&format!("FAILED ({})\n", report.fail_count));
            for channel in report.channels.iter().filter(|c| !c.success) {
                out.push_str(&format!("  - {}\n", channel.name));
                out.push_str(&format!(
                    "    error: {}\n",
                    channel.error.as_deref().unwrap_or("unknown")
                ));
                for attempt in &channel.attempts {
                    let mark = if attempt.success { "+" } else { "x" };
                    out.push_str(&format!(
                        "      {} {} ({}ms)\n",
                        mark, attempt.engine, attempt.duration_ms
                    ));
                    if let Some(error) = &attempt.error {
                        out.push_str(&format!("        {}\n", error));
                    }
                }
            }
        }

        out.push_str("\n=======================================================\n");
        out
    }

    /// Write the report to `dir`, keeping only the most recent files.
    pub async fn save_report_to_file(&self, dir: &Path, max_files: usize) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let session_id = self.state.lock().await.session_id;
        let report_path = dir.join(format!("extraction_report_{}.txt", session_id));

        let text = self.format_report_as_text().await;
        tokio::fs::write(&report_path, text).await?;

        if let Err(e) = clean_old_reports(dir, max_files).await {
            warn!("Report rotation failed: {}", e);
        }

        info!("Report saved to {}", report_path.display());
        Ok(report_path)
    }

    /// One-line progress summary ("12/15 (80%)").
    pub async fn quick_summary(&self) -> String {
        let state = self.state.lock().await;
        let total = state.channels.len();
        if total == 0 {
            return "no channels processed".to_string();
        }
        let success = state.channels.iter().filter(|c| c.success).count();
        format!("{}/{} ({}%)", success, total, success * 100 / total)
    }

    /// Clear all records and restart the session clock.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.channels.clear();
        let now = Utc::now().timestamp_millis();
        state.session_id = now;
        state.started_at = now;
        debug!("Logger reset for a new session");
    }
}

impl Default for ExtractionLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep at most `max_files` report files, newest first.
async fn clean_old_reports(dir: &Path, max_files: usize) -> Result<()> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let modified = entry.metadata().await?.modified()?;
        entries.push((entry.path(), modified));
    }

    entries.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in entries.into_iter().skip(max_files) {
        if tokio::fs::remove_file(&path).await.is_ok() {
            debug!("Removed old report: {}", path.display());
        }
    }
    Ok(())
}
