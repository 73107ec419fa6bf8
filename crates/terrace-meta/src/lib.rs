//! Meta-model, asset, and query types for the Terrace SDK.
//!
//! This crate holds everything that does not touch the network: the
//! runtime schema ([`MetaModel`] and its [`AssetType`] /
//! [`AttributeDefinition`] / [`Operation`] handles), asset identity
//! ([`Oid`]), the mutable [`Asset`] buffer, and the declarative [`Query`]
//! model. The companion `terrace-client` crate drives these over HTTP.
//!
//! Schema handles are cheap to clone (`Arc`-backed) and immutable; all
//! lookups resolve by name through the [`MetaModel`] that produced them.

pub mod asset;
pub mod error;
pub mod oid;
pub mod query;
pub mod schema;

pub use asset::{Asset, Attribute, Value};
pub use error::{MetaError, MetaResult};
pub use oid::Oid;
pub use query::{Comparison, Filter, FilterTerm, Order, Paging, Query, QueryResult, Target};
pub use schema::{
    AssetType, AttributeDefinition, AttributeKind, MetaDocument, MetaModel, Operation,
};
