//! HTTP connector
//!
//! One [`Connector`] owns one endpoint URL, the HTTP client, and the
//! credentials registered for it. Requests go out unauthenticated first;
//! a 401 starts negotiation, walking the server's `WWW-Authenticate`
//! challenges in order and trying each scheme the store holds a
//! credential for. A credential that cannot produce a header (an
//! integrated identity with no token source plugged in) is skipped, not
//! a failure; only exhausting every challenged scheme fails the request.
//!
//! The header that last satisfied the server is cached and attached to
//! subsequent requests, so negotiation normally happens once per
//! connector.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde_json::Value as Json;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::credentials::{
    parse_challenges, registration_policy, Credential, CredentialStore, IntegratedTokenSource,
    Scheme,
};
use crate::error::{ConnectionKind, Error, Result};
use crate::proxy::ProxyProvider;
use crate::secrets::{BearerCredential, JsonFileStorage, SecretError, SecretStorage};
use crate::settings::ConnectorSettings;

/// Root of an endpoint path family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointRoot {
    /// Schema discovery.
    Meta,
    /// Asset queries, writes, and operations.
    Data,
    /// Server configuration.
    Config,
}

impl EndpointRoot {
    fn as_str(&self) -> &'static str {
        match self {
            EndpointRoot::Meta => "meta",
            EndpointRoot::Data => "data",
            EndpointRoot::Config => "config",
        }
    }
}

/// Builder for a [`Connector`].
///
/// Credential registration happens here, at construction time, from the
/// identity configuration and from OAuth2 secret storage. An endpoint
/// with no secrets on disk is normal and registers no bearer credential;
/// unreadable secrets are a configuration error.
pub struct ConnectorBuilder {
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    integrated_auth: Option<bool>,
    proxy: Option<ProxyProvider>,
    secrets: Option<Box<dyn SecretStorage>>,
    settings: ConnectorSettings,
    integrated_tokens: Option<Arc<dyn IntegratedTokenSource>>,
}

impl ConnectorBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            username: None,
            password: None,
            integrated_auth: None,
            proxy: None,
            secrets: None,
            settings: ConnectorSettings::default(),
            integrated_tokens: None,
        }
    }

    /// Set the explicit username and password.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Explicitly enable or disable integrated (NTLM/Negotiate)
    /// authentication. Unset means: integrated when no username is given.
    #[must_use]
    pub fn integrated_auth(mut self, enabled: bool) -> Self {
        self.integrated_auth = Some(enabled);
        self
    }

    /// Route traffic through a forward proxy.
    #[must_use]
    pub fn proxy(mut self, proxy: ProxyProvider) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Use a specific OAuth2 secret storage instead of the default
    /// per-user file.
    #[must_use]
    pub fn secret_storage(mut self, storage: impl SecretStorage + 'static) -> Self {
        self.secrets = Some(Box::new(storage));
        self
    }

    /// Override HTTP settings.
    #[must_use]
    pub fn settings(mut self, settings: ConnectorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Plug in the token source that answers NTLM/Negotiate challenges.
    #[must_use]
    pub fn integrated_tokens(mut self, source: Arc<dyn IntegratedTokenSource>) -> Self {
        self.integrated_tokens = Some(source);
        self
    }

    /// Build the connector, registering credentials per policy.
    pub fn build(self) -> Result<Connector> {
        let mut base_url = Url::parse(&self.base_url)
            .map_err(|err| Error::configuration(format!("invalid endpoint url: {err}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut http = reqwest::Client::builder()
            .connect_timeout(self.settings.connect_timeout())
            .timeout(self.settings.request_timeout())
            .user_agent(self.settings.user_agent.clone());
        if let Some(proxy) = &self.proxy {
            http = http.proxy(proxy.to_reqwest()?);
        }
        let http = http
            .build()
            .map_err(|err| Error::configuration(format!("http client: {err}")))?;

        let mut store = CredentialStore::new();
        for (scheme, credential) in registration_policy(
            self.username.as_deref(),
            self.password.as_deref(),
            self.integrated_auth,
        ) {
            store.register(base_url.as_str(), scheme, credential);
        }

        let storage: Box<dyn SecretStorage> = match self.secrets {
            Some(storage) => storage,
            None => Box::new(JsonFileStorage::default_location()),
        };
        match storage.load() {
            Ok(secrets) => {
                debug!(client_id = %secrets.client_id, "registering bearer credential");
                store.register(
                    base_url.as_str(),
                    Scheme::Bearer,
                    Credential::Bearer(Arc::new(BearerCredential::new(secrets))),
                );
            }
            Err(SecretError::NotFound { path }) => {
                debug!(%path, "no oauth2 secrets, skipping bearer registration");
            }
            Err(err @ SecretError::Invalid { .. }) => {
                return Err(Error::configuration(err.to_string()));
            }
        }

        Ok(Connector {
            http,
            base_url,
            store,
            integrated: self.integrated_tokens,
            established: RwLock::new(None),
        })
    }
}

/// Authenticated HTTP access to one endpoint.
pub struct Connector {
    http: reqwest::Client,
    base_url: Url,
    store: CredentialStore,
    integrated: Option<Arc<dyn IntegratedTokenSource>>,
    /// `Authorization` header that last satisfied the server.
    established: RwLock<Option<String>>,
}

impl Connector {
    /// Endpoint base URL (always ends with `/`).
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the URL for a path under an endpoint root.
    pub(crate) fn endpoint_url(&self, root: EndpointRoot, tail: &[&str]) -> Result<Url> {
        let mut path = root.as_str().to_string();
        for segment in tail {
            path.push('/');
            path.push_str(segment);
        }
        self.base_url
            .join(&path)
            .map_err(|err| Error::configuration(format!("invalid request path '{path}': {err}")))
    }

    /// GET a JSON document.
    pub(crate) async fn get_json(&self, url: Url, token_ctx: &str) -> Result<Json> {
        self.send_json(Method::GET, url, None, token_ctx).await
    }

    /// POST a JSON document and decode the JSON response.
    pub(crate) async fn post_json(&self, url: Url, body: &Json, token_ctx: &str) -> Result<Json> {
        self.send_json(Method::POST, url, Some(body), token_ctx)
            .await
    }

    /// One round trip, negotiating authentication on a 401.
    ///
    /// `token_ctx` identifies what the request addressed (an oid token,
    /// asset type name, or path) and is carried into connection errors.
    async fn send_json(
        &self,
        method: Method,
        url: Url,
        body: Option<&Json>,
        token_ctx: &str,
    ) -> Result<Json> {
        let established = self.established.read().await.clone();
        let response = self
            .dispatch(method.clone(), url.clone(), body, established.as_deref())
            .await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            self.negotiate(method, url.clone(), body, &response).await?
        } else {
            response
        };

        let status = response.status();
        if status.is_success() {
            if status == StatusCode::NO_CONTENT {
                return Ok(Json::Null);
            }
            return response
                .json()
                .await
                .map_err(|err| Error::transport(token_ctx.to_string(), err));
        }

        let kind = match status {
            StatusCode::NOT_FOUND => ConnectionKind::NotFound,
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => ConnectionKind::Conflict,
            _ => ConnectionKind::Transport,
        };
        warn!(%status, %url, token = token_ctx, "request failed");
        Err(Error::connection(
            format!("server returned {status}"),
            token_ctx.to_string(),
            kind,
        ))
    }

    async fn dispatch(
        &self,
        method: Method,
        url: Url,
        body: Option<&Json>,
        authorization: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut request = self.http.request(method, url.clone());
        if let Some(header) = authorization {
            request = request.header(reqwest::header::AUTHORIZATION, header);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        request
            .send()
            .await
            .map_err(|err| Error::transport(url.to_string(), err))
    }

    /// Walk the server's challenges, trying each scheme we hold a
    /// credential for, and return the first non-401 response.
    async fn negotiate(
        &self,
        method: Method,
        url: Url,
        body: Option<&Json>,
        challenge_response: &reqwest::Response,
    ) -> Result<reqwest::Response> {
        let challenged = parse_challenges(
            challenge_response
                .headers()
                .get_all(reqwest::header::WWW_AUTHENTICATE)
                .iter()
                .filter_map(|value| value.to_str().ok()),
        );
        debug!(%url, ?challenged, "authentication challenged");

        for scheme in &challenged {
            let Some(credential) = self.store.lookup(url.as_str(), *scheme) else {
                continue;
            };
            let header = credential
                .authorization(*scheme, &url, &self.http, self.integrated.as_deref())
                .await?;
            let Some(header) = header else {
                debug!(%scheme, "credential declined to answer challenge");
                continue;
            };

            let response = self
                .dispatch(method.clone(), url.clone(), body, Some(&header))
                .await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                debug!(%scheme, "authentication established");
                *self.established.write().await = Some(header);
                return Ok(response);
            }

            // A rejected bearer header may carry a token that was revoked
            // server-side while still locally fresh. Drop the cache and
            // retry this scheme once with a newly minted token.
            if let Credential::Bearer(bearer) = credential {
                debug!("bearer token rejected, refreshing");
                bearer.invalidate().await;
                if let Some(header) = credential
                    .authorization(*scheme, &url, &self.http, self.integrated.as_deref())
                    .await?
                {
                    let response = self
                        .dispatch(method.clone(), url.clone(), body, Some(&header))
                        .await?;
                    if response.status() != StatusCode::UNAUTHORIZED {
                        debug!(%scheme, "authentication established");
                        *self.established.write().await = Some(header);
                        return Ok(response);
                    }
                }
            }
            debug!(%scheme, "scheme rejected, trying next challenge");
        }

        let challenged = challenged
            .iter()
            .map(Scheme::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        Err(Error::Authentication {
            url: url.to_string(),
            challenged,
        })
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("base_url", &self.base_url.as_str())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
