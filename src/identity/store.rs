//! Process-wide identity registry
//!
//! Holds the current user-agent, per-domain cookies and the YouTube anti-bot
//! tokens (visitor data, proof-of-origin token, client version). Values live
//! in memory for fast reads and are written through to the `identity` table
//! so they survive a restart. Writers race last-write-wins per field; no
//! cross-field atomicity is promised or needed.

use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

const KEY_USER_AGENT: &str = "user_agent";
const KEY_PO_TOKEN: &str = "po_token";
const KEY_VISITOR: &str = "visitor_data";
const KEY_CLIENT_VERSION: &str = "client_version";
const COOKIE_KEY_PREFIX: &str = "cookie:";

#[derive(Debug, Default)]
struct IdentityState {
    user_agent: Option<String>,
    cookies: HashMap<String, String>,
    visitor_data: Option<String>,
    po_token: Option<String>,
    client_version: Option<String>,
}

/// Shared identity registry with SQLite write-through persistence
pub struct IdentityStore {
    state: RwLock<IdentityState>,
    pool: Option<Pool<Sqlite>>,
}

impl IdentityStore {
    /// Memory-only store (no persistence); used by tests and embedders that
    /// manage durability themselves.
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(IdentityState::default()),
            pool: None,
        }
    }

    /// Load persisted identity from the database at process start.
    pub async fn load(pool: Pool<Sqlite>) -> Self {
        let mut state = IdentityState::default();

        match sqlx::query("SELECT key, value FROM identity")
            .fetch_all(&pool)
            .await
        {
            Ok(rows) => {
                for row in rows {
                    let key: String = row.get("key");
                    let value: String = row.get("value");
                    match key.as_str() {
                        KEY_USER_AGENT => state.user_agent = Some(value),
                        KEY_PO_TOKEN => state.po_token = Some(value),
                        KEY_VISITOR => state.visitor_data = Some(value),
                        KEY_CLIENT_VERSION => state.client_version = Some(value),
                        other => {
                            if let Some(domain) = other.strip_prefix(COOKIE_KEY_PREFIX) {
                                state.cookies.insert(domain.to_string(), value);
                            }
                        }
                    }
                }
                debug!("Loaded identity ({} cookies)", state.cookies.len());
            }
            Err(e) => warn!("Failed to load persisted identity: {}", e),
        }

        Self {
            state: RwLock::new(state),
            pool: Some(pool),
        }
    }

    // ---------- getters ----------

    pub fn user_agent(&self) -> Option<String> {
        self.state.read().ok()?.user_agent.clone()
    }

    pub fn cookie(&self, domain: &str) -> Option<String> {
        self.state.read().ok()?.cookies.get(domain).cloned()
    }

    pub fn visitor_data(&self) -> Option<String> {
        self.state.read().ok()?.visitor_data.clone()
    }

    pub fn po_token(&self) -> Option<String> {
        self.state.read().ok()?.po_token.clone()
    }

    pub fn client_version(&self) -> Option<String> {
        self.state.read().ok()?.client_version.clone()
    }

    /// True once the minimum signal needed for authenticated extraction is
    /// present: a user-agent and a youtube.com cookie.
    pub fn has_valid_identity(&self) -> bool {
        match self.state.read() {
            Ok(state) => state.user_agent.is_some() && state.cookies.contains_key("youtube.com"),
            Err(_) => false,
        }
    }

    // ---------- setters ----------

    pub async fn set_user_agent(&self, ua: &str) {
        if ua.trim().is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.write() {
            state.user_agent = Some(ua.to_string());
        }
        self.persist(KEY_USER_AGENT, ua).await;
    }

    pub async fn set_cookie(&self, domain: &str, cookie: &str) {
        if cookie.trim().is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.write() {
            state.cookies.insert(domain.to_string(), cookie.to_string());
        }
        self.persist(&format!("{}{}", COOKIE_KEY_PREFIX, domain), cookie)
            .await;
    }

    pub async fn set_visitor_data(&self, data: &str) {
        if data.trim().is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.write() {
            state.visitor_data = Some(data.to_string());
        }
        self.persist(KEY_VISITOR, data).await;
    }

    pub async fn set_po_token(&self, token: &str) {
        if token.trim().is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.write() {
            state.po_token = Some(token.to_string());
        }
        self.persist(KEY_PO_TOKEN, token).await;
    }

    pub async fn set_client_version(&self, version: &str) {
        if version.trim().is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.write() {
            state.client_version = Some(version.to_string());
        }
        self.persist(KEY_CLIENT_VERSION, version).await;
    }

    // ---------- apply to headers ----------

    /// Merge stored identity into `headers` for a request to `url`.
    /// Values the caller already set are NEVER overwritten.
    pub fn apply_to(&self, headers: &mut HashMap<String, String>, url: Option<&str>) {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => return,
        };

        if let Some(ua) = &state.user_agent {
            if is_blank(headers.get("User-Agent")) {
                headers.insert("User-Agent".to_string(), ua.clone());
            }
        }

        let Some(url) = url else { return };
        let domain = canonical_domain(url);

        if let Some(cookie) = state.cookies.get(&domain) {
            if is_blank(headers.get("Cookie")) {
                headers.insert("Cookie".to_string(), cookie.clone());
            }
        }

        // YouTube-family requests carry the full anti-bot header set
        if domain == "youtube.com" {
            if is_blank(headers.get("Referer")) {
                headers.insert("Referer".to_string(), "https://www.youtube.com/".to_string());
            }
            if is_blank(headers.get("Origin")) {
                headers.insert("Origin".to_string(), "https://www.youtube.com".to_string());
            }
            if let Some(visitor) = state.visitor_data.as_deref().filter(|v| !v.is_empty()) {
                if is_blank(headers.get("X-Goog-Visitor-Id")) {
                    headers.insert("X-Goog-Visitor-Id".to_string(), visitor.to_string());
                }
            }
            if let Some(version) = state.client_version.as_deref().filter(|v| !v.is_empty()) {
                if is_blank(headers.get("X-YouTube-Client-Name")) {
                    headers.insert("X-YouTube-Client-Name".to_string(), "1".to_string());
                }
                if is_blank(headers.get("X-YouTube-Client-Version")) {
                    headers.insert("X-YouTube-Client-Version".to_string(), version.to_string());
                }
            }
        }
    }

    /// Absorb a broadcast identity update, skipping blank fields.
    pub async fn apply_update(&self, update: &super::refresh::IdentityUpdate) {
        self.set_user_agent(&update.user_agent).await;
        if !update.cookies.trim().is_empty() {
            self.set_cookie("youtube.com", &update.cookies).await;
        }
        self.set_po_token(&update.po_token).await;
        self.set_visitor_data(&update.visitor_data).await;
        self.set_client_version(&update.client_version).await;
    }

    /// Redacted one-screen dump for logs and the ops surface.
    pub fn debug_summary(&self) -> String {
        let state = match self.state.read() {
            Ok(state) => state,
            Err(_) => return "identity store poisoned".to_string(),
        };

        let mut out = String::from("=== IdentityStore ===\n");
        out.push_str(&format!(
            "UA        : {}\n",
            state
                .user_agent
                .as_deref()
                .map(|ua| truncated(ua, 60))
                .unwrap_or_else(|| "MISSING".to_string())
        ));
        out.push_str(&format!(
            "Cookies   : {}\n",
            state
                .cookies
                .get("youtube.com")
                .map(|c| format!("{} chars", c.len()))
                .unwrap_or_else(|| "MISSING".to_string())
        ));
        out.push_str(&format!(
            "PO Token  : {}\n",
            state
                .po_token
                .as_deref()
                .map(|t| format!("{}...", truncated(t, 20)))
                .unwrap_or_else(|| "MISSING".to_string())
        ));
        out.push_str(&format!(
            "Visitor   : {}\n",
            state
                .visitor_data
                .as_deref()
                .map(|t| format!("{}...", truncated(t, 20)))
                .unwrap_or_else(|| "MISSING".to_string())
        ));
        out.push_str(&format!(
            "CLVersion : {}\n",
            state
                .client_version
                .as_deref()
                .unwrap_or("MISSING")
        ));
        out
    }

    // ---------- private ----------

    async fn persist(&self, key: &str, value: &str) {
        let Some(pool) = &self.pool else { return };
        if let Err(e) = sqlx::query("INSERT OR REPLACE INTO identity (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await
        {
            warn!("Failed to persist identity field {}: {}", key, e);
        }
    }
}

fn is_blank(value: Option<&String>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

fn truncated(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// Canonical cookie domain for a URL. Signed googlevideo.com CDN edges share
/// the youtube.com cookie jar.
pub fn canonical_domain(url: &str) -> String {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default();

    if host.contains("youtube.com") || host.contains("googlevideo.com") || host.contains("youtu.be")
    {
        "youtube.com".to_string()
    } else {
        host
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_to_never_clobbers_caller_headers() {
        let store = IdentityStore::in_memory();
        store.set_user_agent("StoreAgent/1.0").await;
        store.set_cookie("youtube.com", "stored=1").await;

        let mut headers = HashMap::new();
        headers.insert("Cookie".to_string(), "preset".to_string());
        store.apply_to(&mut headers, Some("https://www.youtube.com/watch?v=x"));

        assert_eq!(headers["Cookie"], "preset");
        // UA was absent, so the stored one fills in
        assert_eq!(headers["User-Agent"], "StoreAgent/1.0");
    }

    #[tokio::test]
    async fn test_apply_to_fills_blank_values() {
        let store = IdentityStore::in_memory();
        store.set_user_agent("StoreAgent/1.0").await;

        let mut headers = HashMap::new();
        headers.insert("User-Agent".to_string(), "   ".to_string());
        store.apply_to(&mut headers, None);

        assert_eq!(headers["User-Agent"], "StoreAgent/1.0");
    }

    #[tokio::test]
    async fn test_youtube_requests_get_anti_bot_headers() {
        let store = IdentityStore::in_memory();
        store.set_user_agent("ua").await;
        store.set_visitor_data("visitor123").await;
        store.set_client_version("2.20240101.00.00").await;

        let mut headers = HashMap::new();
        store.apply_to(
            &mut headers,
            Some("https://r4---sn-abc.googlevideo.com/videoplayback?id=1"),
        );

        assert_eq!(headers["X-Goog-Visitor-Id"], "visitor123");
        assert_eq!(headers["X-YouTube-Client-Name"], "1");
        assert_eq!(headers["X-YouTube-Client-Version"], "2.20240101.00.00");
        assert_eq!(headers["Origin"], "https://www.youtube.com");
    }

    #[tokio::test]
    async fn test_blank_setters_are_ignored() {
        let store = IdentityStore::in_memory();
        store.set_user_agent("real").await;
        store.set_user_agent("  ").await;
        assert_eq!(store.user_agent().as_deref(), Some("real"));
    }

    #[tokio::test]
    async fn test_has_valid_identity_requires_ua_and_cookie() {
        let store = IdentityStore::in_memory();
        assert!(!store.has_valid_identity());

        store.set_user_agent("ua").await;
        assert!(!store.has_valid_identity());

        store.set_cookie("youtube.com", "sid=1").await;
        assert!(store.has_valid_identity());
    }

    #[tokio::test]
    async fn test_apply_update_skips_blank_fields() {
        let store = IdentityStore::in_memory();
        store.set_po_token("existing-token").await;

        let update = crate::identity::IdentityUpdate {
            user_agent: "NewUA/2.0".to_string(),
            cookies: "fresh=1".to_string(),
            po_token: String::new(),
            visitor_data: "vis".to_string(),
            client_version: String::new(),
        };
        store.apply_update(&update).await;

        assert_eq!(store.user_agent().as_deref(), Some("NewUA/2.0"));
        assert_eq!(store.cookie("youtube.com").as_deref(), Some("fresh=1"));
        assert_eq!(store.visitor_data().as_deref(), Some("vis"));
        // Blank fields in the update leave prior values untouched
        assert_eq!(store.po_token().as_deref(), Some("existing-token"));
    }

    #[test]
    fn test_canonical_domain_maps_cdn_hosts() {
        assert_eq!(
            canonical_domain("https://r3---sn-xyz.googlevideo.com/videoplayback"),
            "youtube.com"
        );
        assert_eq!(canonical_domain("https://www.youtube.com/watch?v=x"), "youtube.com");
        assert_eq!(canonical_domain("https://example.org/live"), "example.org");
    }
}
