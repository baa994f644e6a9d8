//! Proxy and credential settings handed to each worker at transfer start.
//!
//! The core never stores or persists these; the settings collaborator supplies
//! them and a snapshot is taken every time a worker starts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// HTTP authentication scheme for servers requiring credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    #[default]
    Basic,
    Digest,
}

/// Username/password pair used for basic or digest authentication.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub scheme: AuthScheme,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Proxy map keyed by URL scheme.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProxySettings {
    pub http: Option<String>,
    pub https: Option<String>,
}

impl ProxySettings {
    /// Builds a proxy map from raw setting strings. A blank https proxy falls back
    /// to the http one; returns None when both are blank.
    pub fn new(http: &str, https: &str) -> Option<Self> {
        let http = Some(http.trim()).filter(|s| !s.is_empty()).map(str::to_string);
        let https = Some(https.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| http.clone());
        if http.is_none() && https.is_none() {
            return None;
        }
        Some(Self { http, https })
    }

    /// Proxy to use for `url`, chosen by its scheme.
    pub fn for_url(&self, url: &str) -> Option<&str> {
        let is_https = url
            .get(..8)
            .map(|p| p.eq_ignore_ascii_case("https://"))
            .unwrap_or(false);
        if is_https {
            self.https.as_deref().or(self.http.as_deref())
        } else {
            self.http.as_deref()
        }
    }
}

/// Everything network-related a worker needs, snapshotted at worker start.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub proxy: Option<ProxySettings>,
    pub credentials: Option<Credentials>,
    pub connect_timeout: Duration,
    /// A transfer receiving nothing for this long fails with a network error.
    pub stall_timeout: Duration,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            proxy: None,
            credentials: None,
            connect_timeout: Duration::from_secs(30),
            stall_timeout: Duration::from_secs(30),
        }
    }
}

impl NetworkSettings {
    pub fn proxy_for(&self, url: &str) -> Option<&str> {
        self.proxy.as_ref().and_then(|p| p.for_url(url))
    }
}
