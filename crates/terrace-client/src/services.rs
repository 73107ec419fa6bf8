//! Services layer
//!
//! [`Services`] is the high-level API: it discovers the schema once,
//! turns queries into wire documents, materializes responses into
//! [`Asset`]s, and drives saves and operations. All state lives in the
//! connector and the cached meta model, so `Services` is cheap to share.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Map, Value as Json};
use tokio::sync::OnceCell;
use tracing::debug;

use terrace_meta::{
    Asset, MetaDocument, MetaError, MetaModel, Oid, Operation, Query, QueryResult, Value,
};

use crate::connector::{Connector, EndpointRoot};
use crate::error::{Error, Result};

/// Story/defect tracking level reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TrackingLevel {
    /// Detail tracked at the work item itself.
    On,
    /// Detail tracked on children only.
    Off,
    /// Either level accepted.
    Mix,
}

/// Server-side configuration relevant to clients.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Whether effort recording is enabled.
    pub effort_tracking: bool,
    pub story_tracking_level: TrackingLevel,
    pub defect_tracking_level: TrackingLevel,
    /// Upload size ceiling, bytes.
    #[serde(default)]
    pub max_attachment_size: Option<u64>,
}

#[derive(Deserialize)]
struct OidEnvelope {
    oid: String,
}

/// High-level asset services over one connector.
pub struct Services {
    connector: Arc<Connector>,
    meta: OnceCell<MetaModel>,
}

impl Services {
    pub fn new(connector: Connector) -> Self {
        Self {
            connector: Arc::new(connector),
            meta: OnceCell::new(),
        }
    }

    /// The connector backing this services instance.
    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// The discovered meta model, fetched on first use and reused for the
    /// lifetime of this instance. Concurrent first callers share one
    /// fetch.
    pub async fn meta(&self) -> Result<MetaModel> {
        let meta = self
            .meta
            .get_or_try_init(|| async {
                let url = self.connector.endpoint_url(EndpointRoot::Meta, &["model"])?;
                debug!(%url, "fetching meta model");
                let raw = self.connector.get_json(url, "meta/model").await?;
                let doc: MetaDocument = serde_json::from_value(raw)
                    .map_err(|err| Error::protocol(err.to_string(), "meta/model"))?;
                Ok::<_, Error>(MetaModel::from_document(&doc))
            })
            .await?;
        Ok(meta.clone())
    }

    /// Parse an oid token against the discovered schema.
    pub async fn oid_from_token(&self, token: &str) -> Result<Oid> {
        let meta = self.meta().await?;
        Ok(Oid::from_token(token, &meta)?)
    }

    /// Execute a query and materialize the results.
    ///
    /// Each returned asset carries exactly the queried attributes;
    /// everything else is simply absent. A single-asset query for an oid
    /// that does not exist fails with a not-found connection error
    /// ([`Error::is_not_found`]).
    pub async fn retrieve(&self, query: &Query) -> Result<QueryResult> {
        let meta = self.meta().await?;
        let context = query.target().describe();
        let url = self.connector.endpoint_url(EndpointRoot::Data, &["query"])?;
        let raw = self
            .connector
            .post_json(url, &query.to_document(), &context)
            .await?;

        let total = raw.get("total").and_then(Json::as_u64);
        let rows = raw
            .get("assets")
            .and_then(Json::as_array)
            .ok_or_else(|| Error::protocol("response missing 'assets'", &context))?;

        let mut assets = Vec::with_capacity(rows.len());
        for row in rows {
            assets.push(self.materialize(row, query, &meta, &context)?);
        }
        Ok(QueryResult { assets, total })
    }

    fn materialize(
        &self,
        row: &Json,
        query: &Query,
        meta: &MetaModel,
        context: &str,
    ) -> Result<Asset> {
        let token = row
            .get("oid")
            .and_then(Json::as_str)
            .ok_or_else(|| Error::protocol("asset row missing 'oid'", context))?;
        let oid = Oid::from_token(token, meta)?;
        // The row's token names the concrete type, which may be a subtype
        // of the query target.
        let asset_type = meta.get_asset_type(oid.type_name())?;
        let mut asset = Asset::loaded(oid, asset_type.clone());

        let attributes = row
            .get("attributes")
            .and_then(Json::as_object)
            .cloned()
            .unwrap_or_default();
        for selected in query.selection() {
            // Re-resolve against the concrete type so inherited
            // attributes land under the subtype's handle.
            let definition = asset_type.get_attribute_definition(selected.name())?;
            let cell = attributes.get(selected.name());
            if definition.is_multi_valued() {
                let values = match cell.and_then(|c| c.get("values")).and_then(Json::as_array) {
                    Some(raw_values) => raw_values
                        .iter()
                        .map(|raw| Value::from_json(raw, &definition))
                        .collect::<std::result::Result<Vec<_>, _>>()?,
                    None => Vec::new(),
                };
                asset.load_attribute_values(definition, values)?;
            } else {
                let value = match cell.and_then(|c| c.get("value")) {
                    Some(raw) => Value::from_json(raw, &definition)?,
                    None => Value::Null,
                };
                asset.load_attribute_value(definition, value)?;
            }
        }
        Ok(asset)
    }

    /// Create an in-memory asset of the named type, not yet persisted.
    pub async fn new_asset(&self, type_name: &str, container: Option<Oid>) -> Result<Asset> {
        let meta = self.meta().await?;
        let asset_type = meta.get_asset_type(type_name)?;
        Ok(Asset::new(asset_type, container))
    }

    /// Persist an asset's buffered changes.
    ///
    /// A new asset is created and learns its identity from the response;
    /// an existing asset is updated against its version-stamped oid, and
    /// a stale version fails with a conflict ([`Error::is_conflict`]).
    /// On success the buffered changes are accepted and the asset carries
    /// the new version stamp. Saving an unchanged existing asset is a
    /// no-op.
    pub async fn save(&self, asset: &mut Asset) -> Result<()> {
        let meta = self.meta().await?;
        match asset.oid().cloned() {
            None => {
                let mut body = Map::new();
                body.insert(
                    "assetType".to_string(),
                    Json::String(asset.asset_type().name().to_string()),
                );
                if let Some(container) = asset.container() {
                    body.insert("container".to_string(), Json::String(container.token()));
                }
                body.insert("attributes".to_string(), changes_document(asset));

                let context = asset.asset_type().name().to_string();
                let url = self.connector.endpoint_url(EndpointRoot::Data, &["assets"])?;
                let raw = self
                    .connector
                    .post_json(url, &Json::Object(body), &context)
                    .await?;
                let envelope: OidEnvelope = serde_json::from_value(raw)
                    .map_err(|err| Error::protocol(err.to_string(), &context))?;
                asset.set_oid(Oid::from_token(&envelope.oid, &meta)?);
                asset.accept_changes();
            }
            Some(oid) => {
                if !asset.has_changes() {
                    return Ok(());
                }
                let token = oid.token();
                let body = json!({ "attributes": changes_document(asset) });
                let url = self
                    .connector
                    .endpoint_url(EndpointRoot::Data, &["assets", &token])?;
                let raw = self.connector.post_json(url, &body, &token).await?;
                let envelope: OidEnvelope = serde_json::from_value(raw)
                    .map_err(|err| Error::protocol(err.to_string(), &token))?;
                asset.set_oid(Oid::from_token(&envelope.oid, &meta)?);
                asset.accept_changes();
            }
        }
        Ok(())
    }

    /// Execute a server-side operation against an asset and return its
    /// post-operation oid.
    ///
    /// The target is addressed momentless: operations apply to the
    /// asset's current state, never to a pinned version.
    pub async fn execute_operation(&self, operation: &Operation, oid: &Oid) -> Result<Oid> {
        let meta = self.meta().await?;
        if !meta.is_a(oid.type_name(), operation.asset_type()) {
            return Err(Error::Schema(MetaError::unknown_operation(
                oid.type_name(),
                operation.name(),
            )));
        }

        let token = oid.momentless().token();
        let url = self
            .connector
            .endpoint_url(EndpointRoot::Data, &["assets", &token, "op", operation.name()])?;
        debug!(%token, operation = operation.name(), "executing operation");
        let raw = self.connector.post_json(url, &Json::Null, &token).await?;
        let envelope: OidEnvelope = serde_json::from_value(raw)
            .map_err(|err| Error::protocol(err.to_string(), &token))?;
        Ok(Oid::from_token(&envelope.oid, &meta)?)
    }

    /// Fetch the server's client-relevant configuration.
    pub async fn server_config(&self) -> Result<ServerConfig> {
        let url = self
            .connector
            .endpoint_url(EndpointRoot::Config, &["settings"])?;
        let raw = self.connector.get_json(url, "config/settings").await?;
        serde_json::from_value(raw)
            .map_err(|err| Error::protocol(err.to_string(), "config/settings"))
    }
}

/// Wire form of an asset's buffered changes: per attribute, `set` for
/// single values, `add`/`remove` lists for multi values.
fn changes_document(asset: &Asset) -> Json {
    let mut attributes = Map::new();
    for attribute in asset.changed_attributes() {
        let mut change = Map::new();
        if attribute.definition().is_multi_valued() {
            let added: Vec<Json> = attribute.added().iter().map(Value::to_json).collect();
            let removed: Vec<Json> = attribute.removed().iter().map(Value::to_json).collect();
            if !added.is_empty() {
                change.insert("add".to_string(), Json::Array(added));
            }
            if !removed.is_empty() {
                change.insert("remove".to_string(), Json::Array(removed));
            }
        } else if let Some(value) = attribute.new_value() {
            change.insert("set".to_string(), value.to_json());
        }
        attributes.insert(attribute.definition().name().to_string(), Json::Object(change));
    }
    Json::Object(attributes)
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("connector", &self.connector)
            .field("meta_cached", &self.meta.initialized())
            .finish()
    }
}
