//! Meta model error types
//!
//! Schema resolution failures are programming errors: unknown names are
//! surfaced immediately and must never be retried.

use thiserror::Error;

/// Error raised while resolving names against the meta model or while
/// interpreting identifier tokens and attribute values.
#[derive(Debug, Error)]
pub enum MetaError {
    /// Asset type name not present in the discovered schema.
    #[error("unknown asset type '{name}'")]
    UnknownAssetType { name: String },

    /// Attribute not defined on the asset type (or any of its base types).
    #[error("unknown attribute '{attribute}' on asset type '{asset_type}'")]
    UnknownAttribute {
        asset_type: String,
        attribute: String,
    },

    /// Operation not defined on the asset type (or any of its base types).
    #[error("unknown operation '{operation}' on asset type '{asset_type}'")]
    UnknownOperation {
        asset_type: String,
        operation: String,
    },

    /// Name was not of the expected `Type.Member` form.
    #[error("invalid qualified name '{name}', expected 'Type.Member'")]
    InvalidQualifiedName { name: String },

    /// Oid token could not be parsed.
    #[error("invalid oid token '{token}': {message}")]
    InvalidToken { token: String, message: String },

    /// An attribute definition foreign to the asset's type was used.
    #[error("attribute '{attribute}' does not belong to asset type '{asset_type}'")]
    ForeignAttribute {
        asset_type: String,
        attribute: String,
    },

    /// A wire value could not be interpreted as the attribute's data type.
    #[error("invalid value for attribute '{attribute}': {message}")]
    InvalidValue { attribute: String, message: String },
}

impl MetaError {
    /// Create an unknown-asset-type error.
    pub fn unknown_asset_type(name: impl Into<String>) -> Self {
        MetaError::UnknownAssetType { name: name.into() }
    }

    /// Create an unknown-attribute error.
    pub fn unknown_attribute(asset_type: impl Into<String>, attribute: impl Into<String>) -> Self {
        MetaError::UnknownAttribute {
            asset_type: asset_type.into(),
            attribute: attribute.into(),
        }
    }

    /// Create an unknown-operation error.
    pub fn unknown_operation(asset_type: impl Into<String>, operation: impl Into<String>) -> Self {
        MetaError::UnknownOperation {
            asset_type: asset_type.into(),
            operation: operation.into(),
        }
    }

    /// Create an invalid-token error.
    pub fn invalid_token(token: impl Into<String>, message: impl Into<String>) -> Self {
        MetaError::InvalidToken {
            token: token.into(),
            message: message.into(),
        }
    }
}

/// Result type for meta model operations.
pub type MetaResult<T> = Result<T, MetaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = MetaError::unknown_asset_type("Storp");
        assert_eq!(err.to_string(), "unknown asset type 'Storp'");

        let err = MetaError::unknown_attribute("Story", "Naem");
        assert_eq!(
            err.to_string(),
            "unknown attribute 'Naem' on asset type 'Story'"
        );

        let err = MetaError::invalid_token("Story", "missing id segment");
        assert_eq!(
            err.to_string(),
            "invalid oid token 'Story': missing id segment"
        );
    }
}
