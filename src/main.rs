//! m3u-resolver - IPTV Stream-Link Resolution Pipeline
//!
//! Resolves a channel list (YouTube lives, generic video pages, direct IPTV
//! streams) into playable media URLs plus the headers playback needs, via a
//! priority-ordered chain of extraction engines.

use anyhow::Result;
use clap::Parser;
use m3u_resolver::batch::{self, BatchResolver};
use m3u_resolver::cache::LinkCache;
use m3u_resolver::config::ResolverSettings;
use m3u_resolver::database;
use m3u_resolver::http::HeaderCaptureClient;
use m3u_resolver::identity::IdentityStore;
use m3u_resolver::report::ExtractionLogger;
use m3u_resolver::resolver::{
    DirectLinkResolver, ResolverChain, StreamResolver, YoutubePageResolver, YtDlpResolver,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(about = "Resolve IPTV channel URLs into playable stream links")]
struct Args {
    /// Channels JSON file to resolve
    #[arg(long)]
    input: PathBuf,

    /// Where to write the resolved channel list
    #[arg(long)]
    output: PathBuf,

    /// Database location (defaults to the platform data dir)
    #[arg(long)]
    db: Option<PathBuf>,

    /// yt-dlp format selector
    #[arg(long)]
    format: Option<String>,

    /// Also emit an M3U playlist of the successful channels
    #[arg(long)]
    m3u: Option<PathBuf>,

    /// Save the session report into this directory
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut settings = ResolverSettings::default().sanitized();
    if let Some(db) = args.db {
        settings.database_path = db;
    }
    if let Some(format) = args.format {
        settings.preferred_format = format;
    }

    if let Some(parent) = settings.database_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let pool =
        database::initialize_database(&settings.database_path.to_string_lossy()).await?;
    let cache = Arc::new(LinkCache::new(pool.clone()));
    let identity = Arc::new(IdentityStore::load(pool).await);

    let http = Arc::new(HeaderCaptureClient::new(
        Arc::clone(&identity),
        settings.high_value_hosts.clone(),
        Duration::from_secs(settings.http_timeout_secs),
    )?);

    let mut resolvers: Vec<Arc<dyn StreamResolver>> = vec![
        Arc::new(DirectLinkResolver::new()),
        Arc::new(YoutubePageResolver::new(Arc::clone(&http))),
    ];

    match YtDlpResolver::new(
        &settings.preferred_format,
        Duration::from_secs(settings.ytdlp_timeout_secs),
    ) {
        Ok(ytdlp) => resolvers.push(Arc::new(ytdlp)),
        Err(e) => {
            // The chain still works without the fallback engine, just with
            // narrower site coverage
            warn!("yt-dlp unavailable, running without the fallback engine: {}", e);
            warn!("Install it with: pip install yt-dlp");
        }
    }

    let logger = Arc::new(ExtractionLogger::new());
    let chain = Arc::new(
        ResolverChain::new(resolvers, Arc::clone(&identity), Arc::clone(&logger))
            .with_cache(Arc::clone(&cache), settings.cache_validity_hours),
    );

    let channels = BatchResolver::load_channels(&args.input).await?;
    info!("Loaded {} channels from {}", channels.len(), args.input.display());

    let batch = BatchResolver::new(chain, Arc::clone(&http));
    let output = batch.run(channels).await;

    BatchResolver::save_output(&args.output, &output).await?;
    info!("Resolved list written to {}", args.output.display());

    if let Some(m3u_path) = args.m3u {
        let playlist = batch::generate_m3u_playlist(&output);
        tokio::fs::write(&m3u_path, playlist).await?;
        info!("Playlist written to {}", m3u_path.display());
    }

    let swept = cache
        .invalidate_expired(chrono::Utc::now().timestamp_millis())
        .await;
    if swept > 0 {
        info!("Swept {} expired cache entries", swept);
    }

    println!("{}", logger.quick_summary().await);
    if let Some(report_dir) = args.report_dir {
        let report_path = logger
            .save_report_to_file(&report_dir, settings.max_report_files)
            .await?;
        println!("Report: {}", report_path.display());
    }

    Ok(())
}
