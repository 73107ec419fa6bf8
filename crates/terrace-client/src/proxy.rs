//! Outbound proxy configuration
//!
//! All endpoint traffic can be routed through one forward proxy, with
//! optional proxy credentials and a bypass list for hosts that must be
//! reached directly.

use std::fmt;

use url::Url;

use crate::error::{Error, Result};

/// Forward proxy settings applied to the connector's HTTP client.
#[derive(Clone)]
pub struct ProxyProvider {
    url: Url,
    username: Option<String>,
    password: Option<String>,
    /// Comma-separated hosts reached directly, `no_proxy` style.
    bypass: Option<String>,
}

impl ProxyProvider {
    /// Proxy at the given URL, no credentials, no bypass list.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            username: None,
            password: None,
            bypass: None,
        }
    }

    /// Set proxy credentials.
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the bypass list (comma-separated hosts, `no_proxy` style).
    #[must_use]
    pub fn with_bypass(mut self, bypass: impl Into<String>) -> Self {
        self.bypass = Some(bypass.into());
        self
    }

    /// Proxy URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Build the `reqwest` proxy for the client.
    pub(crate) fn to_reqwest(&self) -> Result<reqwest::Proxy> {
        let mut proxy = reqwest::Proxy::all(self.url.as_str())
            .map_err(|err| Error::configuration(format!("invalid proxy url: {err}")))?;
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            proxy = proxy.basic_auth(username, password);
        }
        if let Some(bypass) = &self.bypass {
            proxy = proxy.no_proxy(reqwest::NoProxy::from_string(bypass));
        }
        Ok(proxy)
    }
}

impl fmt::Debug for ProxyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyProvider")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("bypass", &self.bypass)
            .finish()
    }
}
