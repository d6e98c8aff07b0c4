//! Token refresh agent
//!
//! Drives a browser-engine session against the YouTube front page to pull
//! fresh session cookies and anti-bot tokens, publishes them into the
//! [`IdentityStore`](super::IdentityStore), and broadcasts an update event
//! for any other process holding stale tokens. Concurrent triggers coalesce
//! onto a single in-flight session.

use crate::browser::BrowserEngine;
use crate::identity::IdentityStore;
use crate::utils::error::ResolverError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

/// Payload of the IDENTITY_UPDATED broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityUpdate {
    pub user_agent: String,
    pub cookies: String,
    pub po_token: String,
    pub visitor_data: String,
    pub client_version: String,
}

pub struct TokenRefreshAgent {
    engine: Arc<dyn BrowserEngine>,
    identity: Arc<IdentityStore>,
    events: broadcast::Sender<IdentityUpdate>,
    flight: Mutex<()>,
    generation: AtomicU64,
    timeout: Duration,
}

impl TokenRefreshAgent {
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        identity: Arc<IdentityStore>,
        timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            engine,
            identity,
            events,
            flight: Mutex::new(()),
            generation: AtomicU64::new(0),
            timeout,
        }
    }

    /// Subscribe to identity-update broadcasts.
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityUpdate> {
        self.events.subscribe()
    }

    /// Number of refreshes completed since construction.
    pub fn completed_refreshes(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Run one refresh session. Callers arriving while a session is in
    /// flight wait for it and then return without starting another.
    pub async fn refresh(&self) -> Result<()> {
        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.flight.lock().await;
        if self.generation.load(Ordering::Acquire) != seen {
            debug!("Refresh already completed by a concurrent caller");
            return Ok(());
        }

        debug!("Starting identity refresh session");
        let tokens = self
            .engine
            .collect_identity(self.timeout)
            .await
            .map_err(|e| ResolverError::TokenRefresh(e.to_string()))?;

        self.identity.set_user_agent(&tokens.user_agent).await;
        if !tokens.cookies.trim().is_empty() {
            self.identity.set_cookie("youtube.com", &tokens.cookies).await;
        }
        self.identity.set_visitor_data(&tokens.visitor_data).await;
        self.identity.set_po_token(&tokens.po_token).await;
        self.identity.set_client_version(&tokens.client_version).await;

        self.generation.fetch_add(1, Ordering::Release);

        let update = IdentityUpdate {
            user_agent: self.identity.user_agent().unwrap_or_default(),
            cookies: self.identity.cookie("youtube.com").unwrap_or_default(),
            po_token: self.identity.po_token().unwrap_or_default(),
            visitor_data: self.identity.visitor_data().unwrap_or_default(),
            client_version: self.identity.client_version().unwrap_or_default(),
        };
        // No receivers is fine; the broadcast is best-effort
        let _ = self.events.send(update);

        info!("Identity refresh completed");
        Ok(())
    }

    /// Fire-and-forget refresh, used after an extraction failure so the
    /// failure response is never blocked on the browser session.
    pub fn trigger(self: &Arc<Self>) {
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = agent.refresh().await {
                warn!("Background identity refresh failed: {}", e);
            }
        });
    }
}
