//! Meta model: runtime-discovered schema handles
//!
//! Asset types, attribute definitions, and operations are not known at
//! compile time. They are resolved by exact name against a [`MetaModel`]
//! built from the server's discovery document, and handed out as immutable,
//! cheaply cloneable handles (handle + registry pattern).

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};

/// Data type of a schema attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    /// Text value.
    Text,
    /// Numeric value (integer or decimal).
    Numeric,
    /// Date/time value.
    Date,
    /// Boolean value.
    Boolean,
    /// Relation to another asset, held as an oid.
    Relation,
}

impl AttributeKind {
    /// Get the string representation used on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKind::Text => "text",
            AttributeKind::Numeric => "numeric",
            AttributeKind::Date => "date",
            AttributeKind::Boolean => "boolean",
            AttributeKind::Relation => "relation",
        }
    }

    /// Parse from string.
    #[must_use]
    pub fn parse_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "string" => Some(AttributeKind::Text),
            "numeric" | "number" => Some(AttributeKind::Numeric),
            "date" | "datetime" => Some(AttributeKind::Date),
            "boolean" | "bool" => Some(AttributeKind::Boolean),
            "relation" => Some(AttributeKind::Relation),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ── Discovery document (wire form) ───────────────────────────────────────

/// The schema discovery document fetched from the server's meta endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDocument {
    /// All asset types known to the server.
    pub asset_types: Vec<AssetTypeDef>,
}

/// One asset type in the discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetTypeDef {
    /// Type name (e.g. "Story").
    pub name: String,

    /// Base type name, when this type is a subtype.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,

    /// Attributes defined directly on this type.
    #[serde(default)]
    pub attributes: Vec<AttributeDefDoc>,

    /// Named state-transition operations defined on this type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<String>,
}

/// One attribute definition in the discovery document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefDoc {
    /// Attribute name (e.g. "Name").
    pub name: String,

    /// Data type.
    pub kind: AttributeKind,

    /// Whether this attribute holds multiple values (multi-relation).
    #[serde(default)]
    pub multi_valued: bool,

    /// Whether the server rejects writes to this attribute.
    #[serde(default)]
    pub read_only: bool,
}

// ── Handles ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct AttributeInner {
    asset_type: String,
    name: String,
    kind: AttributeKind,
    multi_valued: bool,
    read_only: bool,
}

/// Immutable handle for one attribute of one asset type.
///
/// Obtained from [`MetaModel::get_attribute_definition`] or
/// [`AssetType::get_attribute_definition`], never constructed by callers.
/// Belongs to exactly one asset type and is only valid for selection,
/// filtering, and mutation against that type or its subtypes.
#[derive(Debug, Clone)]
pub struct AttributeDefinition {
    inner: Arc<AttributeInner>,
}

impl AttributeDefinition {
    fn new(asset_type: &str, doc: &AttributeDefDoc) -> Self {
        Self {
            inner: Arc::new(AttributeInner {
                asset_type: asset_type.to_string(),
                name: doc.name.clone(),
                kind: doc.kind,
                multi_valued: doc.multi_valued,
                read_only: doc.read_only,
            }),
        }
    }

    /// The owning asset type name.
    pub fn asset_type(&self) -> &str {
        &self.inner.asset_type
    }

    /// The attribute name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Qualified `Type.Attribute` name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.inner.asset_type, self.inner.name)
    }

    /// The attribute's data type.
    pub fn kind(&self) -> AttributeKind {
        self.inner.kind
    }

    /// Whether the attribute holds multiple values.
    pub fn is_multi_valued(&self) -> bool {
        self.inner.multi_valued
    }

    /// Whether the server rejects writes to this attribute.
    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }
}

impl PartialEq for AttributeDefinition {
    fn eq(&self, other: &Self) -> bool {
        self.inner.asset_type == other.inner.asset_type && self.inner.name == other.inner.name
    }
}

impl Eq for AttributeDefinition {}

impl Hash for AttributeDefinition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.asset_type.hash(state);
        self.inner.name.hash(state);
    }
}

impl fmt::Display for AttributeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.inner.asset_type, self.inner.name)
    }
}

#[derive(Debug)]
struct OperationInner {
    asset_type: String,
    name: String,
}

/// Immutable handle for a named server-side state transition.
#[derive(Debug, Clone)]
pub struct Operation {
    inner: Arc<OperationInner>,
}

impl Operation {
    fn new(asset_type: &str, name: &str) -> Self {
        Self {
            inner: Arc::new(OperationInner {
                asset_type: asset_type.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// The owning asset type name.
    pub fn asset_type(&self) -> &str {
        &self.inner.asset_type
    }

    /// The operation name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Qualified `Type.Operation` name.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.inner.asset_type, self.inner.name)
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.inner.asset_type == other.inner.asset_type && self.inner.name == other.inner.name
    }
}

impl Eq for Operation {}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.inner.asset_type, self.inner.name)
    }
}

#[derive(Debug)]
struct AssetTypeInner {
    name: String,
    base: Option<String>,
    /// Attributes defined directly on this type, in document order.
    attributes: Vec<AttributeDefinition>,
    /// Attributes materialized from the base chain at build time.
    inherited: Vec<AttributeDefinition>,
    operations: Vec<Operation>,
    inherited_operations: Vec<Operation>,
}

/// Immutable handle for one asset type in the discovered schema.
#[derive(Debug, Clone)]
pub struct AssetType {
    inner: Arc<AssetTypeInner>,
}

impl AssetType {
    /// The type name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The base type name, when this is a subtype.
    pub fn base(&self) -> Option<&str> {
        self.inner.base.as_deref()
    }

    /// Resolve an attribute by name, including inherited attributes.
    pub fn get_attribute_definition(&self, name: &str) -> MetaResult<AttributeDefinition> {
        self.inner
            .attributes
            .iter()
            .chain(self.inner.inherited.iter())
            .find(|a| a.name() == name)
            .cloned()
            .ok_or_else(|| MetaError::unknown_attribute(&self.inner.name, name))
    }

    /// Resolve an operation by name, including inherited operations.
    pub fn get_operation(&self, name: &str) -> MetaResult<Operation> {
        self.inner
            .operations
            .iter()
            .chain(self.inner.inherited_operations.iter())
            .find(|o| o.name() == name)
            .cloned()
            .ok_or_else(|| MetaError::unknown_operation(&self.inner.name, name))
    }

    /// Whether the given attribute definition is valid for this type.
    ///
    /// True when the definition belongs to this type or to one of its base
    /// types (inherited attributes remain usable on subtypes).
    pub fn owns(&self, definition: &AttributeDefinition) -> bool {
        self.inner
            .attributes
            .iter()
            .chain(self.inner.inherited.iter())
            .any(|a| a == definition)
    }
}

impl PartialEq for AssetType {
    fn eq(&self, other: &Self) -> bool {
        self.inner.name == other.inner.name
    }
}

impl Eq for AssetType {}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.name)
    }
}

// ── Registry ─────────────────────────────────────────────────────────────

/// Name-resolution registry over the discovered schema.
///
/// Built once from a [`MetaDocument`] and retained for the process lifetime;
/// lookups are by exact name and failures are programming errors, not
/// transient conditions.
#[derive(Debug, Clone, Default)]
pub struct MetaModel {
    asset_types: Arc<HashMap<String, AssetType>>,
}

impl MetaModel {
    /// Build the registry from a discovery document.
    ///
    /// Inherited attributes and operations are materialized into each
    /// subtype handle so resolution never walks the base chain at call time.
    pub fn from_document(doc: &MetaDocument) -> Self {
        let defs: HashMap<&str, &AssetTypeDef> =
            doc.asset_types.iter().map(|t| (t.name.as_str(), t)).collect();

        let mut asset_types = HashMap::with_capacity(doc.asset_types.len());
        for def in &doc.asset_types {
            let attributes: Vec<AttributeDefinition> = def
                .attributes
                .iter()
                .map(|a| AttributeDefinition::new(&def.name, a))
                .collect();
            let operations: Vec<Operation> = def
                .operations
                .iter()
                .map(|o| Operation::new(&def.name, o))
                .collect();

            let mut inherited = Vec::new();
            let mut inherited_operations = Vec::new();
            let mut base = def.base.as_deref();
            // Walk the base chain; a cycle or dangling base name simply ends
            // the walk rather than failing schema construction.
            let mut seen = vec![def.name.as_str()];
            while let Some(base_name) = base {
                if seen.contains(&base_name) {
                    break;
                }
                seen.push(base_name);
                match defs.get(base_name) {
                    Some(base_def) => {
                        inherited.extend(
                            base_def
                                .attributes
                                .iter()
                                .map(|a| AttributeDefinition::new(base_name, a)),
                        );
                        inherited_operations.extend(
                            base_def
                                .operations
                                .iter()
                                .map(|o| Operation::new(base_name, o)),
                        );
                        base = base_def.base.as_deref();
                    }
                    None => break,
                }
            }

            asset_types.insert(
                def.name.clone(),
                AssetType {
                    inner: Arc::new(AssetTypeInner {
                        name: def.name.clone(),
                        base: def.base.clone(),
                        attributes,
                        inherited,
                        operations,
                        inherited_operations,
                    }),
                },
            );
        }

        Self {
            asset_types: Arc::new(asset_types),
        }
    }

    /// Whether the schema defines the given asset type.
    pub fn has_asset_type(&self, name: &str) -> bool {
        self.asset_types.contains_key(name)
    }

    /// Resolve an asset type by name.
    pub fn get_asset_type(&self, name: &str) -> MetaResult<AssetType> {
        self.asset_types
            .get(name)
            .cloned()
            .ok_or_else(|| MetaError::unknown_asset_type(name))
    }

    /// Resolve an attribute by qualified `Type.Attribute` name.
    pub fn get_attribute_definition(&self, qualified: &str) -> MetaResult<AttributeDefinition> {
        let (type_name, attr_name) = split_qualified(qualified)?;
        self.get_asset_type(type_name)?
            .get_attribute_definition(attr_name)
    }

    /// Resolve an operation by qualified `Type.Operation` name.
    pub fn get_operation(&self, qualified: &str) -> MetaResult<Operation> {
        let (type_name, op_name) = split_qualified(qualified)?;
        self.get_asset_type(type_name)?.get_operation(op_name)
    }

    /// Whether `name` is `ancestor` or a (transitive) subtype of it.
    pub fn is_a(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name);
        let mut hops = 0usize;
        while let Some(n) = current {
            if n == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.asset_types.len() {
                return false;
            }
            current = self.asset_types.get(n).and_then(|t| t.base());
        }
        false
    }
}

fn split_qualified(qualified: &str) -> MetaResult<(&str, &str)> {
    qualified
        .split_once('.')
        .filter(|(t, m)| !t.is_empty() && !m.is_empty())
        .ok_or_else(|| MetaError::InvalidQualifiedName {
            name: qualified.to_string(),
        })
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! A small schema shared by unit tests across the workspace.

    use super::*;

    /// Build a meta model with Workitem/Story/Defect, Scope, and Member.
    pub fn sample_meta() -> MetaModel {
        let doc: MetaDocument = serde_json::from_value(serde_json::json!({
            "assetTypes": [
                {
                    "name": "Workitem",
                    "attributes": [
                        {"name": "Name", "kind": "text"},
                        {"name": "Scope", "kind": "relation"},
                        {"name": "AssetState", "kind": "numeric", "readOnly": true},
                        {"name": "ChangeDate", "kind": "date", "readOnly": true}
                    ],
                    "operations": ["Delete"]
                },
                {
                    "name": "Story",
                    "base": "Workitem",
                    "attributes": [
                        {"name": "Estimate", "kind": "numeric"},
                        {"name": "Owners", "kind": "relation", "multiValued": true},
                        {"name": "Source", "kind": "relation"}
                    ],
                    "operations": ["Inactivate", "Reactivate"]
                },
                {
                    "name": "Defect",
                    "base": "Workitem",
                    "attributes": [
                        {"name": "Severity", "kind": "text"}
                    ]
                },
                {
                    "name": "Scope",
                    "attributes": [
                        {"name": "Name", "kind": "text"}
                    ]
                },
                {
                    "name": "Member",
                    "attributes": [
                        {"name": "Name", "kind": "text"},
                        {"name": "Email", "kind": "text"},
                        {"name": "ChangeDate", "kind": "date", "readOnly": true}
                    ]
                }
            ]
        }))
        .expect("sample schema is well formed");
        MetaModel::from_document(&doc)
    }
}
