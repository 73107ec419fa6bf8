//! HTTP connector and services layer for the Terrace SDK.
//!
//! Two layers:
//!
//! - [`Connector`]: one endpoint, one HTTP client, and the credentials
//!   registered for it. Authentication is challenge driven: the first
//!   401 is answered by walking the server's `WWW-Authenticate` schemes
//!   against the credential store.
//! - [`Services`]: the asset API on top. Discovers the schema once,
//!   executes queries, persists asset changes with optimistic
//!   concurrency, and runs server-side operations.
//!
//! ```no_run
//! use terrace_client::{ConnectorBuilder, Services};
//! use terrace_meta::{Oid, Query};
//!
//! # async fn run() -> terrace_client::Result<()> {
//! let connector = ConnectorBuilder::new("https://host/instance/")
//!     .credentials("admin", "admin")
//!     .build()?;
//! let services = Services::new(connector);
//!
//! let meta = services.meta().await?;
//! let story = meta.get_asset_type("Story")?;
//! let name = story.get_attribute_definition("Name")?;
//!
//! let result = services
//!     .retrieve(&Query::for_oid(Oid::new("Story", 1042)).select(name))
//!     .await?;
//! # let _ = result;
//! # Ok(())
//! # }
//! ```

pub mod connector;
pub mod credentials;
pub mod error;
pub mod proxy;
pub mod secrets;
pub mod services;
pub mod settings;

pub use connector::{Connector, ConnectorBuilder, EndpointRoot};
pub use credentials::{
    Credential, CredentialStore, IntegratedIdentity, IntegratedTokenSource, Scheme,
};
pub use error::{ConnectionKind, Error, Result};
pub use proxy::ProxyProvider;
pub use secrets::{BearerCredential, JsonFileStorage, OAuthSecrets, SecretError, SecretStorage};
pub use services::{Services, ServerConfig, TrackingLevel};
pub use settings::ConnectorSettings;
