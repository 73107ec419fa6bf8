//! Connector tuning knobs

use std::time::Duration;

use serde::Deserialize;

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    120
}

fn default_user_agent() -> String {
    format!("terrace-sdk/{}", env!("CARGO_PKG_VERSION"))
}

/// HTTP behavior settings for a connector. All fields have defaults, so
/// deserializing `{}` yields a usable configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectorSettings {
    /// Connection establishment timeout, seconds.
    pub connect_timeout_secs: u64,
    /// Whole-request timeout, seconds.
    pub request_timeout_secs: u64,
    /// `User-Agent` sent on every request.
    pub user_agent: String,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl ConnectorSettings {
    #[must_use]
    pub fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub(crate) fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
