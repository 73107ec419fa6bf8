//! Query model
//!
//! A [`Query`] describes one retrieval intent: what to select, how to
//! filter, sort, and page, and as-of when. Construction is builder style
//! and consuming; a submitted query is never mutated. The wire form is a
//! single JSON document whose serialization is deterministic (same query,
//! byte-identical body).

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value as Json};

use crate::asset::{Asset, Value};
use crate::oid::Oid;
use crate::schema::{AssetType, AttributeDefinition};

/// Comparison operator for one filter term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparison {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
}

impl Comparison {
    /// Wire name of the operator.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Comparison::Equal => "eq",
            Comparison::NotEqual => "ne",
            Comparison::GreaterThan => "gt",
            Comparison::GreaterOrEqual => "ge",
            Comparison::LessThan => "lt",
            Comparison::LessOrEqual => "le",
            Comparison::Contains => "contains",
        }
    }
}

/// One attribute compared against a literal.
#[derive(Debug, Clone)]
pub struct FilterTerm {
    attribute: AttributeDefinition,
    operator: Comparison,
    value: Value,
}

impl FilterTerm {
    /// Create a term with an explicit operator.
    pub fn new(
        attribute: AttributeDefinition,
        operator: Comparison,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            attribute,
            operator,
            value: value.into(),
        }
    }

    /// Equality term.
    pub fn equal(attribute: AttributeDefinition, value: impl Into<Value>) -> Self {
        Self::new(attribute, Comparison::Equal, value)
    }

    /// The compared attribute.
    pub fn attribute(&self) -> &AttributeDefinition {
        &self.attribute
    }
}

/// A filter expression tree: terms combined by and/or.
#[derive(Debug, Clone)]
pub enum Filter {
    /// A single term.
    Term(FilterTerm),
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// Any sub-filter must match.
    Or(Vec<Filter>),
}

impl Filter {
    /// Create an equality term filter.
    pub fn eq(attribute: AttributeDefinition, value: impl Into<Value>) -> Self {
        Filter::Term(FilterTerm::equal(attribute, value))
    }

    /// Create a term filter with an explicit operator.
    pub fn term(
        attribute: AttributeDefinition,
        operator: Comparison,
        value: impl Into<Value>,
    ) -> Self {
        Filter::Term(FilterTerm::new(attribute, operator, value))
    }

    /// Combine this filter with another using AND.
    #[must_use]
    pub fn and_with(self, other: Filter) -> Self {
        match self {
            Filter::And(mut filters) => {
                filters.push(other);
                Filter::And(filters)
            }
            _ => Filter::And(vec![self, other]),
        }
    }

    /// Combine this filter with another using OR.
    #[must_use]
    pub fn or_with(self, other: Filter) -> Self {
        match self {
            Filter::Or(mut filters) => {
                filters.push(other);
                Filter::Or(filters)
            }
            _ => Filter::Or(vec![self, other]),
        }
    }

    /// Render the wire (JSON) form.
    pub fn to_json(&self) -> Json {
        match self {
            Filter::Term(t) => json!({
                "attribute": t.attribute.name(),
                "op": t.operator.as_str(),
                "value": t.value.to_json(),
            }),
            Filter::And(filters) => json!({
                "and": filters.iter().map(Filter::to_json).collect::<Vec<_>>(),
            }),
            Filter::Or(filters) => json!({
                "or": filters.iter().map(Filter::to_json).collect::<Vec<_>>(),
            }),
        }
    }
}

impl From<FilterTerm> for Filter {
    fn from(term: FilterTerm) -> Self {
        Filter::Term(term)
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

impl Order {
    /// Wire name of the direction.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::Ascending => "asc",
            Order::Descending => "desc",
        }
    }
}

/// Paging window: a start offset and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    /// Number of results to skip.
    pub start: u32,
    /// Maximum number of results to return.
    pub page_size: u32,
}

impl Paging {
    /// Create a window at the given offset.
    pub fn new(start: u32, page_size: u32) -> Self {
        Self { start, page_size }
    }
}

/// Target of a query: one asset or all assets of a type.
#[derive(Debug, Clone)]
pub enum Target {
    /// Single-asset retrieval.
    Oid(Oid),
    /// Multi-asset retrieval, implicitly including subtypes.
    Type(AssetType),
}

impl Target {
    /// Token for error context: the oid token or the type name.
    pub fn describe(&self) -> String {
        match self {
            Target::Oid(oid) => oid.token(),
            Target::Type(t) => t.name().to_string(),
        }
    }
}

/// Declarative description of one retrieval.
#[derive(Debug, Clone)]
pub struct Query {
    target: Target,
    selection: Vec<AttributeDefinition>,
    filter: Option<Filter>,
    order_by: Vec<(AttributeDefinition, Order)>,
    paging: Option<Paging>,
    as_of: Option<DateTime<Utc>>,
    history: bool,
    find: Option<String>,
}

impl Query {
    /// Query one asset by oid.
    pub fn for_oid(oid: Oid) -> Self {
        Self::with_target(Target::Oid(oid))
    }

    /// Query all assets of a type (including subtypes).
    pub fn for_type(asset_type: AssetType) -> Self {
        Self::with_target(Target::Type(asset_type))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            selection: Vec::new(),
            filter: None,
            order_by: Vec::new(),
            paging: None,
            as_of: None,
            history: false,
            find: None,
        }
    }

    /// Add an attribute to the selection. Insertion order is preserved for
    /// response column mapping.
    #[must_use]
    pub fn select(mut self, attribute: AttributeDefinition) -> Self {
        if !self.selection.contains(&attribute) {
            self.selection.push(attribute);
        }
        self
    }

    /// Set the filter expression.
    #[must_use]
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Append a sort key. Keys apply major-to-minor in append order; ties
    /// beyond the listed keys are broken by the server's default.
    #[must_use]
    pub fn order_by(mut self, attribute: AttributeDefinition, order: Order) -> Self {
        self.order_by.push((attribute, order));
        self
    }

    /// Set the paging window. Omitted means unpaged.
    #[must_use]
    pub fn page(mut self, paging: Paging) -> Self {
        self.paging = Some(paging);
        self
    }

    /// Constrain results to the data's state at the given instant.
    #[must_use]
    pub fn as_of(mut self, instant: DateTime<Utc>) -> Self {
        self.as_of = Some(instant);
        self
    }

    /// Return one result per historical version instead of only the
    /// current state. Independent of [`Query::as_of`]; the two combine.
    #[must_use]
    pub fn with_history(mut self) -> Self {
        self.history = true;
        self
    }

    /// Free-text search across the target's text attributes.
    #[must_use]
    pub fn find(mut self, text: impl Into<String>) -> Self {
        self.find = Some(text.into());
        self
    }

    /// The query target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The selected attributes, in insertion order.
    pub fn selection(&self) -> &[AttributeDefinition] {
        &self.selection
    }

    /// Whether this is a history query.
    pub fn is_history(&self) -> bool {
        self.history
    }

    /// Render the wire document sent to the data endpoint.
    ///
    /// `serde_json` maps are ordered, so structurally equal queries always
    /// produce byte-identical bodies.
    pub fn to_document(&self) -> Json {
        let mut doc = Map::new();
        match &self.target {
            Target::Oid(oid) => {
                doc.insert("oid".to_string(), Json::String(oid.token()));
            }
            Target::Type(t) => {
                doc.insert("assetType".to_string(), Json::String(t.name().to_string()));
            }
        }
        doc.insert(
            "select".to_string(),
            Json::Array(
                self.selection
                    .iter()
                    .map(|a| Json::String(a.name().to_string()))
                    .collect(),
            ),
        );
        if let Some(filter) = &self.filter {
            doc.insert("where".to_string(), filter.to_json());
        }
        if !self.order_by.is_empty() {
            doc.insert(
                "sort".to_string(),
                Json::Array(
                    self.order_by
                        .iter()
                        .map(|(a, o)| {
                            json!({"attribute": a.name(), "order": o.as_str()})
                        })
                        .collect(),
                ),
            );
        }
        if let Some(paging) = &self.paging {
            doc.insert(
                "page".to_string(),
                json!({"start": paging.start, "size": paging.page_size}),
            );
        }
        if let Some(as_of) = &self.as_of {
            doc.insert(
                "asOf".to_string(),
                Json::String(as_of.to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
        if self.history {
            doc.insert("history".to_string(), Json::Bool(true));
        }
        if let Some(find) = &self.find {
            doc.insert("find".to_string(), Json::String(find.clone()));
        }
        Json::Object(doc)
    }
}

/// Ordered, one-shot materialization of one query response.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Returned assets, in server order (respecting the query's sort keys).
    pub assets: Vec<Asset>,
    /// Total number of matches, when the server reports it (useful with
    /// paging, where `assets` holds only one window).
    pub total: Option<u64>,
}
