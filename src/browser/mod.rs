//! Headless browser capability seam
//!
//! The resolution pipeline needs two things from a browser: load a page with
//! network sniffing enabled until a stream manifest request appears, and load
//! the YouTube front page to run the scripted token query. How a given
//! embedder renders pages (WebView, CEF, a remote browser farm) is its own
//! business; this trait is the whole contract.

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

/// What network sniffing produced for one page load
#[derive(Debug, Clone)]
pub struct SniffedManifest {
    /// First manifest URL observed in the page's network traffic
    pub manifest_url: String,
    /// User-agent the browser session actually used
    pub user_agent: String,
    /// Session cookie string for the manifest's domain, when any were set
    pub cookies: Option<String>,
}

/// Tokens the scripted query pulled out of the identity-bearing page
#[derive(Debug, Clone, Default)]
pub struct BrowserIdentity {
    pub user_agent: String,
    pub cookies: String,
    pub visitor_data: String,
    pub po_token: String,
    pub client_version: String,
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Load `url` and watch network traffic until a manifest URL shows up,
    /// or `timeout` elapses.
    async fn sniff_manifest(&self, url: &str, timeout: Duration) -> Result<SniffedManifest>;

    /// Load the canonical identity page and extract session tokens via the
    /// scripted query. Fields the page did not expose come back empty.
    async fn collect_identity(&self, timeout: Duration) -> Result<BrowserIdentity>;
}
