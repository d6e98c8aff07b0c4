//! HTTP client with anti-403 header capture
//!
//! Wraps `reqwest` so that every outbound request is enriched from the
//! [`IdentityStore`](crate::identity::IdentityStore) (without overriding
//! anything the caller set), and every response from a high-value CDN host
//! feeds the captured-header accumulator. The captured set is what playback
//! later needs to present to avoid 403s, so it must be cleared between
//! channels to prevent cross-channel bleed.

use crate::identity::IdentityStore;
use anyhow::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Request headers worth snapshotting from high-value traffic
const CAPTURE_KEYS: [&str; 5] = ["Cookie", "User-Agent", "Origin", "Referer", "X-Goog-Visitor-Id"];

/// Default User-Agent fallback
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 13; K) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36";

pub struct HeaderCaptureClient {
    client: reqwest::Client,
    identity: Arc<IdentityStore>,
    high_value_hosts: Vec<String>,
    captured: Mutex<HashMap<String, String>>,
}

impl HeaderCaptureClient {
    pub fn new(
        identity: Arc<IdentityStore>,
        high_value_hosts: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout * 2)
            .build()?;

        Ok(Self {
            client,
            identity,
            high_value_hosts,
            captured: Mutex::new(HashMap::new()),
        })
    }

    /// GET with identity layered under the caller's headers.
    pub async fn get(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> Result<reqwest::Response> {
        let sent = self.compose_headers(url, headers);
        let response = self
            .client
            .get(url)
            .headers(to_header_map(&sent))
            .send()
            .await?;

        self.observe_response(url, &sent, &response).await;
        Ok(response)
    }

    /// GET returning the body text; non-2xx statuses are errors.
    pub async fn get_text(&self, url: &str, headers: &HashMap<String, String>) -> Result<String> {
        let response = self.get(url, headers).await?;
        let response = response.error_for_status()?;
        Ok(response.text().await?)
    }

    /// HEAD probe with exactly the given playback headers. Accepts 2xx/3xx.
    /// On a transport error an HLS-looking URL passes anyway, since signed
    /// CDN links sometimes reject HEAD while playing fine.
    pub async fn validate_stream(&self, url: &str, headers: &HashMap<String, String>) -> bool {
        let result = self
            .client
            .head(url)
            .headers(to_header_map(headers))
            .send()
            .await;

        match result {
            Ok(response) => {
                let code = response.status().as_u16();
                let ok = (200..400).contains(&code);
                debug!("Stream validation HEAD: HTTP {} -> {}", code, ok);
                ok
            }
            Err(e) => {
                warn!("Stream validation transport error: {}", e);
                url.contains(".m3u8") || url.contains("googlevideo.com")
            }
        }
    }

    /// Snapshot of the headers captured since the last clear.
    pub fn captured_headers(&self) -> HashMap<String, String> {
        self.captured.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Reset the accumulator. Call before each independent channel
    /// resolution.
    pub fn clear_captured(&self) {
        if let Ok(mut captured) = self.captured.lock() {
            captured.clear();
        }
    }

    // ---------- private ----------

    fn compose_headers(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
    ) -> HashMap<String, String> {
        let mut sent = headers.clone();
        self.identity.apply_to(&mut sent, Some(url));
        if !sent.contains_key("User-Agent") {
            sent.insert("User-Agent".to_string(), DEFAULT_USER_AGENT.to_string());
        }
        sent
    }

    async fn observe_response(
        &self,
        url: &str,
        sent: &HashMap<String, String>,
        response: &reqwest::Response,
    ) {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();

        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").to_string())
            .filter(|v| !v.is_empty())
            .collect();

        let visitor = response
            .headers()
            .get("X-Goog-Visitor-Id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        self.capture_exchange(
            &host,
            response.status().is_success(),
            sent,
            &set_cookies,
            visitor.as_deref(),
        );

        // Opportunistic identity pickup from high-value traffic
        if self.is_high_value(&host) && response.status().is_success() {
            if let Some(visitor) = &visitor {
                self.identity.set_visitor_data(visitor).await;
            }
            if !set_cookies.is_empty() {
                let domain = crate::identity::store::canonical_domain(url);
                self.identity
                    .set_cookie(&domain, &set_cookies.join("; "))
                    .await;
            }
        }
    }

    fn is_high_value(&self, host: &str) -> bool {
        self.high_value_hosts.iter().any(|h| host.contains(h))
    }

    /// Core capture rule, split out from the transport for testability.
    fn capture_exchange(
        &self,
        host: &str,
        success: bool,
        sent: &HashMap<String, String>,
        set_cookies: &[String],
        visitor: Option<&str>,
    ) {
        let Ok(mut captured) = self.captured.lock() else {
            return;
        };

        if self.is_high_value(host) && success {
            debug!("Capturing headers from {}", host);

            for key in CAPTURE_KEYS {
                if let Some(value) = sent.get(key) {
                    captured.insert(key.to_string(), value.clone());
                }
            }

            // Response cookies accumulate onto whatever was already sent
            if !set_cookies.is_empty() {
                let fresh = set_cookies.join("; ");
                let merged = match captured.get("Cookie") {
                    Some(existing) if !existing.is_empty() => format!("{}; {}", existing, fresh),
                    _ => fresh,
                };
                captured.insert("Cookie".to_string(), merged);
            }

            if let Some(visitor) = visitor {
                captured.insert("X-Goog-Visitor-Id".to_string(), visitor.to_string());
            }
        }

        // Always keep a UA on hand as a fallback
        if let Some(ua) = sent.get("User-Agent") {
            captured
                .entry("User-Agent".to_string())
                .or_insert_with(|| ua.clone());
        }
    }
}

fn to_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        match (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => warn!("Skipping invalid header '{}'", key),
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> HeaderCaptureClient {
        HeaderCaptureClient::new(
            Arc::new(IdentityStore::in_memory()),
            vec!["googlevideo.com".to_string()],
            Duration::from_secs(5),
        )
        .expect("client")
    }

    fn sent(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_high_value_host_capture() {
        let client = test_client();
        client.capture_exchange(
            "r4---sn-abc.googlevideo.com",
            true,
            &sent(&[
                ("User-Agent", "ua-1"),
                ("Cookie", "sid=1"),
                ("Referer", "https://www.youtube.com/"),
                ("Accept", "*/*"),
            ]),
            &[],
            None,
        );

        let captured = client.captured_headers();
        assert_eq!(captured["User-Agent"], "ua-1");
        assert_eq!(captured["Cookie"], "sid=1");
        assert_eq!(captured["Referer"], "https://www.youtube.com/");
        // Non-capture keys are not recorded
        assert!(!captured.contains_key("Accept"));
    }

    #[test]
    fn test_set_cookie_accumulates() {
        let client = test_client();
        client.capture_exchange(
            "manifest.googlevideo.com",
            true,
            &sent(&[("Cookie", "sid=1")]),
            &["visit=aa".to_string()],
            None,
        );
        client.capture_exchange(
            "manifest.googlevideo.com",
            true,
            &sent(&[]),
            &["pref=bb".to_string()],
            None,
        );

        let captured = client.captured_headers();
        assert_eq!(captured["Cookie"], "sid=1; visit=aa; pref=bb");
    }

    #[test]
    fn test_low_value_host_only_records_ua_fallback() {
        let client = test_client();
        client.capture_exchange(
            "example.org",
            true,
            &sent(&[("User-Agent", "ua-low"), ("Cookie", "secret=1")]),
            &[],
            None,
        );

        let captured = client.captured_headers();
        assert_eq!(captured["User-Agent"], "ua-low");
        assert!(!captured.contains_key("Cookie"));
    }

    #[test]
    fn test_failed_response_captures_nothing_but_ua() {
        let client = test_client();
        client.capture_exchange(
            "r1.googlevideo.com",
            false,
            &sent(&[("User-Agent", "ua-f"), ("Cookie", "sid=9")]),
            &[],
            None,
        );

        let captured = client.captured_headers();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured["User-Agent"], "ua-f");
    }

    #[test]
    fn test_clear_captured_resets_state() {
        let client = test_client();
        client.capture_exchange(
            "r1.googlevideo.com",
            true,
            &sent(&[("Cookie", "a=1")]),
            &[],
            None,
        );
        assert!(!client.captured_headers().is_empty());

        client.clear_captured();
        assert!(client.captured_headers().is_empty());
    }
}
