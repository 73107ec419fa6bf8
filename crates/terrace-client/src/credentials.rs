//! Credential registration and challenge handling
//!
//! Credentials are registered per endpoint URI at construction time and
//! looked up by longest URI prefix, so one store can serve several
//! endpoints with different identities. Which credentials get registered
//! is a pure function of the caller's configuration
//! ([`registration_policy`]); the store itself never decides policy.
//!
//! Scheme selection is challenge driven: the server's `WWW-Authenticate`
//! header names the schemes it accepts, in preference order, and the
//! connector walks that order trying each scheme it holds a credential
//! for.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use url::Url;

use crate::error::Result;
use crate::secrets::BearerCredential;

/// Authentication scheme, as named in `WWW-Authenticate` challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Basic,
    Ntlm,
    Negotiate,
    Bearer,
}

impl Scheme {
    /// Canonical header spelling of the scheme.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Basic => "Basic",
            Scheme::Ntlm => "NTLM",
            Scheme::Negotiate => "Negotiate",
            Scheme::Bearer => "Bearer",
        }
    }
}

impl FromStr for Scheme {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("basic") {
            Ok(Scheme::Basic)
        } else if s.eq_ignore_ascii_case("ntlm") {
            Ok(Scheme::Ntlm)
        } else if s.eq_ignore_ascii_case("negotiate") {
            Ok(Scheme::Negotiate)
        } else if s.eq_ignore_ascii_case("bearer") {
            Ok(Scheme::Bearer)
        } else {
            Err(())
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity used when answering an integrated (NTLM/Negotiate) challenge.
/// `None` fields mean the ambient process identity.
#[derive(Clone, PartialEq, Eq)]
pub struct IntegratedIdentity {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for IntegratedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegratedIdentity")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Produces the opaque token carried in an NTLM or Negotiate
/// `Authorization` header.
///
/// Token generation is platform security machinery (SSPI, GSSAPI) and is
/// plugged in rather than built in. Without a source, integrated
/// credentials are skipped during negotiation and the next challenged
/// scheme is tried instead.
#[async_trait]
pub trait IntegratedTokenSource: Send + Sync {
    /// Produce a token for the scheme, or `None` to decline.
    async fn token(
        &self,
        scheme: Scheme,
        url: &Url,
        identity: &IntegratedIdentity,
    ) -> Result<Option<String>>;
}

/// A registered credential for one scheme.
#[derive(Clone)]
pub enum Credential {
    /// Username and password, presented base64-encoded.
    Basic { username: String, password: String },
    /// NTLM or Negotiate identity; the token comes from a plugged
    /// [`IntegratedTokenSource`].
    Integrated(IntegratedIdentity),
    /// OAuth2 access tokens minted by a [`BearerCredential`].
    Bearer(Arc<BearerCredential>),
}

impl Credential {
    /// Render the `Authorization` header value for the given scheme, or
    /// `None` when this credential cannot answer (no token source, or a
    /// declined integrated token).
    pub async fn authorization(
        &self,
        scheme: Scheme,
        url: &Url,
        http: &reqwest::Client,
        integrated: Option<&dyn IntegratedTokenSource>,
    ) -> Result<Option<String>> {
        match self {
            Credential::Basic { username, password } => {
                let encoded = BASE64.encode(format!("{username}:{password}"));
                Ok(Some(format!("Basic {encoded}")))
            }
            Credential::Integrated(identity) => match integrated {
                Some(source) => Ok(source
                    .token(scheme, url, identity)
                    .await?
                    .map(|token| format!("{} {token}", scheme.as_str()))),
                None => Ok(None),
            },
            Credential::Bearer(bearer) => {
                let token = bearer.access_token(http).await?;
                Ok(Some(format!("Bearer {token}")))
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Credential::Integrated(identity) => f.debug_tuple("Integrated").field(identity).finish(),
            Credential::Bearer(bearer) => f.debug_tuple("Bearer").field(bearer).finish(),
        }
    }
}

/// Which credentials to register for an endpoint, derived from the
/// caller's configuration.
///
/// - No username: integrated access is assumed wanted unless explicitly
///   disabled, so NTLM and Negotiate are registered when
///   `integrated_auth` is unset or `true`.
/// - Username present: Basic is always registered; NTLM and Negotiate
///   are added only when `integrated_auth` is explicitly `true`, and
///   then with the same explicit username and password.
///
/// Bearer registration is separate: it happens when OAuth2 secrets load,
/// and is handled by the connector builder.
pub fn registration_policy(
    username: Option<&str>,
    password: Option<&str>,
    integrated_auth: Option<bool>,
) -> Vec<(Scheme, Credential)> {
    let mut registered = Vec::new();
    match username {
        None => {
            if integrated_auth.unwrap_or(true) {
                let identity = IntegratedIdentity {
                    username: None,
                    password: None,
                };
                registered.push((Scheme::Ntlm, Credential::Integrated(identity.clone())));
                registered.push((Scheme::Negotiate, Credential::Integrated(identity)));
            }
        }
        Some(username) => {
            registered.push((
                Scheme::Basic,
                Credential::Basic {
                    username: username.to_string(),
                    password: password.unwrap_or_default().to_string(),
                },
            ));
            if integrated_auth == Some(true) {
                let identity = IntegratedIdentity {
                    username: Some(username.to_string()),
                    password: password.map(str::to_string),
                };
                registered.push((Scheme::Ntlm, Credential::Integrated(identity.clone())));
                registered.push((Scheme::Negotiate, Credential::Integrated(identity)));
            }
        }
    }
    registered
}

/// Credentials keyed by endpoint URI prefix and scheme.
#[derive(Debug, Default)]
pub struct CredentialStore {
    entries: HashMap<String, Vec<(Scheme, Credential)>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a credential for a URI prefix. Later registrations for
    /// the same prefix and scheme replace earlier ones.
    pub fn register(&mut self, uri_prefix: &str, scheme: Scheme, credential: Credential) {
        let entry = self
            .entries
            .entry(normalize_prefix(uri_prefix))
            .or_default();
        entry.retain(|(existing, _)| *existing != scheme);
        entry.push((scheme, credential));
    }

    /// Find the credential for a scheme at the longest registered prefix
    /// of `url`.
    pub fn lookup(&self, url: &str, scheme: Scheme) -> Option<&Credential> {
        let url = normalize_prefix(url);
        self.entries
            .iter()
            .filter(|(prefix, _)| url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .and_then(|(_, credentials)| {
                credentials
                    .iter()
                    .find(|(registered, _)| *registered == scheme)
                    .map(|(_, credential)| credential)
            })
    }

}

fn normalize_prefix(uri: &str) -> String {
    let mut uri = uri.to_string();
    if !uri.ends_with('/') {
        uri.push('/');
    }
    uri
}

/// Parse the scheme names out of `WWW-Authenticate` header values,
/// preserving server order and dropping schemes this client does not
/// speak. A header may carry several comma-separated challenges; comma
/// deep inside a challenge's parameters is told apart by the absence of
/// `=` in a scheme token.
pub fn parse_challenges<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<Scheme> {
    let mut schemes = Vec::new();
    for header in headers {
        for segment in header.split(',') {
            let first_token = segment.trim().split_whitespace().next().unwrap_or("");
            if first_token.contains('=') {
                continue;
            }
            if let Ok(scheme) = Scheme::from_str(first_token) {
                if !schemes.contains(&scheme) {
                    schemes.push(scheme);
                }
            }
        }
    }
    schemes
}
