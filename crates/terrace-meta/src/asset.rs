//! In-memory asset model
//!
//! Assets are partially materialized: only the attributes selected in the
//! originating query are present. Local mutation is buffered on the asset
//! and shipped to the server by `Services::save`; nothing touches the wire
//! until then.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{MetaError, MetaResult};
use crate::oid::Oid;
use crate::schema::{AssetType, AttributeDefinition, AttributeKind};

/// One attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Text value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Decimal value.
    Float(f64),
    /// Boolean value.
    Boolean(bool),
    /// Date/time value.
    Date(DateTime<Utc>),
    /// Relation to another asset.
    Relation(Oid),
}

impl Value {
    /// Whether this is the absent value.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as text if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a boolean if this is a boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as an oid if this is a relation value.
    pub fn as_oid(&self) -> Option<&Oid> {
        match self {
            Value::Relation(oid) => Some(oid),
            _ => None,
        }
    }

    /// Render the wire (JSON) form.
    ///
    /// Relations are carried as oid tokens, dates as RFC 3339 strings.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Value::Relation(oid) => serde_json::Value::String(oid.token()),
        }
    }

    /// Interpret a wire (JSON) value as the given attribute kind.
    pub fn from_json(raw: &serde_json::Value, definition: &AttributeDefinition) -> MetaResult<Self> {
        let invalid = |message: &str| MetaError::InvalidValue {
            attribute: definition.qualified_name(),
            message: message.to_string(),
        };
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match definition.kind() {
            AttributeKind::Text => raw
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .ok_or_else(|| invalid("expected a string")),
            AttributeKind::Numeric => {
                if let Some(i) = raw.as_i64() {
                    Ok(Value::Integer(i))
                } else if let Some(f) = raw.as_f64() {
                    Ok(Value::Float(f))
                } else {
                    Err(invalid("expected a number"))
                }
            }
            AttributeKind::Boolean => raw
                .as_bool()
                .map(Value::Boolean)
                .ok_or_else(|| invalid("expected a boolean")),
            AttributeKind::Date => {
                let s = raw.as_str().ok_or_else(|| invalid("expected a date string"))?;
                DateTime::parse_from_rfc3339(s)
                    .map(|d| Value::Date(d.with_timezone(&Utc)))
                    .map_err(|_| invalid("expected an RFC 3339 date"))
            }
            AttributeKind::Relation => {
                let s = raw.as_str().ok_or_else(|| invalid("expected an oid token"))?;
                Oid::parse(s).map(Value::Relation)
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<Oid> for Value {
    fn from(oid: Oid) -> Self {
        Value::Relation(oid)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::Date(d)
    }
}

// ── Attribute ────────────────────────────────────────────────────────────

/// Loaded content of one attribute: a single value or a value collection.
#[derive(Debug, Clone, PartialEq)]
enum Loaded {
    Single(Value),
    Multi(Vec<Value>),
}

/// One attribute's state on an asset: the value(s) loaded from the server
/// plus any locally buffered changes.
///
/// Reads go through [`Attribute::value`] / [`Attribute::values`], which
/// reflect pending changes; mutation goes through the owning [`Asset`].
#[derive(Debug, Clone)]
pub struct Attribute {
    definition: AttributeDefinition,
    loaded: Loaded,
    new_value: Option<Value>,
    added: Vec<Value>,
    removed: Vec<Value>,
}

impl Attribute {
    fn loaded_single(definition: AttributeDefinition, value: Value) -> Self {
        Self {
            definition,
            loaded: Loaded::Single(value),
            new_value: None,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    fn loaded_multi(definition: AttributeDefinition, values: Vec<Value>) -> Self {
        Self {
            definition,
            loaded: Loaded::Multi(values),
            new_value: None,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    fn unloaded(definition: AttributeDefinition) -> Self {
        if definition.is_multi_valued() {
            Self::loaded_multi(definition, Vec::new())
        } else {
            Self::loaded_single(definition, Value::Null)
        }
    }

    /// The attribute's definition.
    pub fn definition(&self) -> &AttributeDefinition {
        &self.definition
    }

    /// Current single value, with any pending local set applied.
    pub fn value(&self) -> &Value {
        if let Some(v) = &self.new_value {
            return v;
        }
        match &self.loaded {
            Loaded::Single(v) => v,
            Loaded::Multi(_) => &Value::Null,
        }
    }

    /// Current value collection, with pending adds/removes applied.
    pub fn values(&self) -> Vec<&Value> {
        match &self.loaded {
            Loaded::Multi(vs) => vs
                .iter()
                .filter(|v| !self.removed.contains(v))
                .chain(self.added.iter())
                .collect(),
            Loaded::Single(v) if !v.is_null() => vec![v],
            Loaded::Single(_) => Vec::new(),
        }
    }

    /// Whether local changes are buffered on this attribute.
    pub fn has_changes(&self) -> bool {
        self.new_value.is_some() || !self.added.is_empty() || !self.removed.is_empty()
    }

    /// The pending scalar value, if one was set.
    pub fn new_value(&self) -> Option<&Value> {
        self.new_value.as_ref()
    }

    /// Values pending addition to a multi-valued attribute.
    pub fn added(&self) -> &[Value] {
        &self.added
    }

    /// Values pending removal from a multi-valued attribute.
    pub fn removed(&self) -> &[Value] {
        &self.removed
    }

    /// Fold pending changes into the loaded state (after a successful save).
    fn accept_changes(&mut self) {
        if let Some(v) = self.new_value.take() {
            self.loaded = Loaded::Single(v);
        }
        if !self.added.is_empty() || !self.removed.is_empty() {
            let merged: Vec<Value> = self.values().into_iter().cloned().collect();
            self.loaded = Loaded::Multi(merged);
            self.added.clear();
            self.removed.clear();
        }
    }
}

// ── Asset ────────────────────────────────────────────────────────────────

/// One schema instance in memory.
///
/// Holds only the attributes selected by the originating query (sparse map
/// keyed by attribute handle). A freshly created asset has no oid until the
/// first save assigns one. Dropping an asset has no server-side effect;
/// deletion is an explicit operation.
#[derive(Debug, Clone)]
pub struct Asset {
    oid: Option<Oid>,
    asset_type: AssetType,
    container: Option<Oid>,
    attributes: HashMap<AttributeDefinition, Attribute>,
}

impl Asset {
    /// Create an unsaved asset of the given type, scoped to a container
    /// (e.g. a parent project). No server round trip happens here.
    pub fn new(asset_type: AssetType, container: Option<Oid>) -> Self {
        Self {
            oid: None,
            asset_type,
            container,
            attributes: HashMap::new(),
        }
    }

    /// Create an asset loaded from a server record.
    pub fn loaded(oid: Oid, asset_type: AssetType) -> Self {
        Self {
            oid: Some(oid),
            asset_type,
            container: None,
            attributes: HashMap::new(),
        }
    }

    /// The server-confirmed oid, absent until the first save.
    pub fn oid(&self) -> Option<&Oid> {
        self.oid.as_ref()
    }

    /// The asset's type handle.
    pub fn asset_type(&self) -> &AssetType {
        &self.asset_type
    }

    /// The container this unsaved asset is scoped to.
    pub fn container(&self) -> Option<&Oid> {
        self.container.as_ref()
    }

    /// Apply a server-assigned oid (called by the services layer after a
    /// successful save or operation).
    pub fn set_oid(&mut self, oid: Oid) {
        self.oid = Some(oid);
    }

    /// Get a loaded attribute, if it was part of the originating selection.
    pub fn get_attribute(&self, definition: &AttributeDefinition) -> Option<&Attribute> {
        self.attributes.get(definition)
    }

    /// Buffer a scalar (or single-relation) value change.
    ///
    /// Rejected for multi-valued attributes; those change through
    /// [`Asset::add_attribute_value`] / [`Asset::remove_attribute_value`].
    pub fn set_attribute_value(
        &mut self,
        definition: &AttributeDefinition,
        value: impl Into<Value>,
    ) -> MetaResult<()> {
        if definition.is_multi_valued() {
            return Err(MetaError::InvalidValue {
                attribute: definition.qualified_name(),
                message: "attribute is multi-valued, use add/remove".to_string(),
            });
        }
        let attr = self.entry(definition)?;
        attr.new_value = Some(value.into());
        Ok(())
    }

    /// Buffer adding a value to a multi-valued attribute.
    pub fn add_attribute_value(
        &mut self,
        definition: &AttributeDefinition,
        value: impl Into<Value>,
    ) -> MetaResult<()> {
        self.check_multi_valued(definition)?;
        let attr = self.entry(definition)?;
        attr.added.push(value.into());
        Ok(())
    }

    /// Buffer removing a value from a multi-valued attribute.
    pub fn remove_attribute_value(
        &mut self,
        definition: &AttributeDefinition,
        value: impl Into<Value>,
    ) -> MetaResult<()> {
        self.check_multi_valued(definition)?;
        let attr = self.entry(definition)?;
        attr.removed.push(value.into());
        Ok(())
    }

    /// Populate a single-valued attribute from a server record.
    pub fn load_attribute_value(
        &mut self,
        definition: AttributeDefinition,
        value: Value,
    ) -> MetaResult<()> {
        self.check_owned(&definition)?;
        self.attributes.insert(
            definition.clone(),
            Attribute::loaded_single(definition, value),
        );
        Ok(())
    }

    /// Populate a multi-valued attribute from a server record.
    pub fn load_attribute_values(
        &mut self,
        definition: AttributeDefinition,
        values: Vec<Value>,
    ) -> MetaResult<()> {
        self.check_owned(&definition)?;
        self.attributes.insert(
            definition.clone(),
            Attribute::loaded_multi(definition, values),
        );
        Ok(())
    }

    /// Attributes with buffered local changes.
    pub fn changed_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values().filter(|a| a.has_changes())
    }

    /// Whether any attribute carries buffered changes.
    pub fn has_changes(&self) -> bool {
        self.attributes.values().any(Attribute::has_changes)
    }

    /// Fold all pending changes into loaded state (after a successful save).
    pub fn accept_changes(&mut self) {
        for attr in self.attributes.values_mut() {
            attr.accept_changes();
        }
    }

    fn check_owned(&self, definition: &AttributeDefinition) -> MetaResult<()> {
        if self.asset_type.owns(definition) {
            Ok(())
        } else {
            Err(MetaError::ForeignAttribute {
                asset_type: self.asset_type.name().to_string(),
                attribute: definition.qualified_name(),
            })
        }
    }

    fn check_multi_valued(&self, definition: &AttributeDefinition) -> MetaResult<()> {
        if definition.is_multi_valued() {
            Ok(())
        } else {
            Err(MetaError::InvalidValue {
                attribute: definition.qualified_name(),
                message: "attribute is single-valued, use set".to_string(),
            })
        }
    }

    fn entry(&mut self, definition: &AttributeDefinition) -> MetaResult<&mut Attribute> {
        self.check_owned(definition)?;
        Ok(self
            .attributes
            .entry(definition.clone())
            .or_insert_with(|| Attribute::unloaded(definition.clone())))
    }
}
