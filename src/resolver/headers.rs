//! Inline header encoding
//!
//! Every resolver that carries playback headers alongside a URL encodes
//! them as `<url>|<key1>=<value1>&<key2>=<value2>`, the convention the
//! playback layer parses regardless of which engine won. Values are taken
//! verbatim; `&` and `=` inside values are an accepted limitation.

use std::collections::HashMap;

/// Append headers to a URL in the pipe convention. A URL that already
/// carries a header suffix gets the new pairs merged with `&`.
pub fn encode_inline(url: &str, headers: &[(String, String)]) -> String {
    if headers.is_empty() {
        return url.to_string();
    }
    let options = headers
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&");
    if url.contains('|') {
        format!("{}&{}", url, options)
    } else {
        format!("{}|{}", url, options)
    }
}

/// Strip any inline header suffix, leaving the bare URL.
pub fn strip_inline(url: &str) -> &str {
    url.split('|').next().unwrap_or(url)
}

/// A resolved link split into its URL and header parts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub url: String,
    /// Header pairs in the order they were encoded
    pub headers: Vec<(String, String)>,
}

impl ResolvedLink {
    /// Split an inline-encoded string on the first `|`, then `&`, then the
    /// first `=` of each pair.
    pub fn parse(encoded: &str) -> Self {
        let Some((url, suffix)) = encoded.split_once('|') else {
            return Self {
                url: encoded.to_string(),
                headers: Vec::new(),
            };
        };

        let headers = suffix
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                pair.split_once('=')
                    .map(|(key, value)| (key.to_string(), value.to_string()))
            })
            .collect();

        Self {
            url: url.to_string(),
            headers,
        }
    }

    /// Header pairs as a map (later duplicates win).
    pub fn header_map(&self) -> HashMap<String, String> {
        self.headers.iter().cloned().collect()
    }

    pub fn has_headers(&self) -> bool {
        !self.headers.is_empty()
    }
}
