//! Stream resolvers
//!
//! Each resolver knows how to turn one class of channel URL into a playable
//! media URL. The chain tries them in descending priority until one
//! succeeds.

pub mod browser;
pub mod chain;
pub mod direct;
pub mod headers;
pub mod native;
pub mod ytdlp;

use anyhow::Result;
use async_trait::async_trait;

pub use browser::BrowserSniffResolver;
pub use chain::{ChannelOutcome, ResolverChain};
pub use direct::DirectLinkResolver;
pub use headers::ResolvedLink;
pub use native::YoutubePageResolver;
pub use ytdlp::YtDlpResolver;

/// Core trait for all stream resolvers
///
/// This trait isolates the pipeline from the specific extraction method
/// (direct passthrough, native page extraction, browser sniffing, yt-dlp).
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Returns a unique identifier for this engine (e.g. "direct-link",
    /// "ytdlp-fallback")
    fn name(&self) -> &'static str;

    /// Checks if this resolver can handle the given URL. Pure predicate,
    /// no I/O.
    fn can_resolve(&self, url: &str) -> bool;

    /// Resolve the URL to a final playable link, optionally carrying inline
    /// headers in the `url|key=value&key=value` convention. All failures
    /// come back as `Err`; this must never panic.
    async fn resolve(&self, url: &str) -> Result<String>;

    /// Trial order within the chain (higher = tried first).
    fn priority(&self) -> i32 {
        0
    }
}
