//! Asset identifiers
//!
//! An [`Oid`] names one asset, optionally pinned to a specific historical
//! moment. The moment component doubles as the optimistic-concurrency token:
//! updates are sent against the moment the asset was loaded at, and the
//! server rejects the write when its stored moment has advanced.

use std::fmt;

use crate::error::{MetaError, MetaResult};
use crate::schema::MetaModel;

/// Identifier for one asset, optionally at a specific version.
///
/// Token grammar is `Type:id` for a momentless identifier (the asset's
/// current-state stream) and `Type:id:moment` for one historical snapshot.
/// Two oids are equal only when type, id, and moment all match; a momentless
/// oid never equals a versioned one for the same asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid {
    type_name: String,
    id: u64,
    moment: Option<u64>,
}

impl Oid {
    /// Create a momentless oid.
    pub fn new(type_name: impl Into<String>, id: u64) -> Self {
        Self {
            type_name: type_name.into(),
            id,
            moment: None,
        }
    }

    /// Create an oid pinned to a specific moment.
    pub fn with_moment(type_name: impl Into<String>, id: u64, moment: u64) -> Self {
        Self {
            type_name: type_name.into(),
            id,
            moment: Some(moment),
        }
    }

    /// Parse a token string, validating the type name against the meta model.
    pub fn from_token(token: &str, meta: &MetaModel) -> MetaResult<Self> {
        let oid = Self::parse(token)?;
        if !meta.has_asset_type(&oid.type_name) {
            return Err(MetaError::unknown_asset_type(&oid.type_name));
        }
        Ok(oid)
    }

    /// Parse a token string without schema validation.
    ///
    /// Used internally when mapping server responses, where the type name is
    /// resolved against the meta model immediately afterwards.
    pub(crate) fn parse(token: &str) -> MetaResult<Self> {
        let mut parts = token.split(':');
        let type_name = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MetaError::invalid_token(token, "missing type name"))?;
        let id = parts
            .next()
            .ok_or_else(|| MetaError::invalid_token(token, "missing id segment"))?
            .parse::<u64>()
            .map_err(|_| MetaError::invalid_token(token, "id is not a number"))?;
        let moment = match parts.next() {
            Some(m) => Some(
                m.parse::<u64>()
                    .map_err(|_| MetaError::invalid_token(token, "moment is not a number"))?,
            ),
            None => None,
        };
        if parts.next().is_some() {
            return Err(MetaError::invalid_token(token, "too many segments"));
        }
        Ok(Self {
            type_name: type_name.to_string(),
            id,
            moment,
        })
    }

    /// The asset type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The numeric id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The moment (version) number, if pinned.
    pub fn moment(&self) -> Option<u64> {
        self.moment
    }

    /// Whether this oid has no moment component.
    pub fn is_momentless(&self) -> bool {
        self.moment.is_none()
    }

    /// Derive the identifier with the moment stripped.
    ///
    /// The result identifies the asset's live stream rather than one
    /// historical snapshot.
    pub fn momentless(&self) -> Oid {
        Oid {
            type_name: self.type_name.clone(),
            id: self.id,
            moment: None,
        }
    }

    /// Render the token string.
    pub fn token(&self) -> String {
        match self.moment {
            Some(m) => format!("{}:{}:{}", self.type_name, self.id, m),
            None => format!("{}:{}", self.type_name, self.id),
        }
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.type_name, self.id)?;
        if let Some(m) = self.moment {
            write!(f, ":{m}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::test_support::sample_meta;

    #[test]
    fn token_round_trip_momentless() {
        let meta = sample_meta();
        let oid = Oid::from_token("Story:1094", &meta).unwrap();
        assert_eq!(oid.type_name(), "Story");
        assert_eq!(oid.id(), 1094);
        assert!(oid.is_momentless());
        assert_eq!(oid.token(), "Story:1094");
    }

    #[test]
    fn token_round_trip_with_moment() {
        let meta = sample_meta();
        let oid = Oid::from_token("Story:1094:1446", &meta).unwrap();
        assert_eq!(oid.moment(), Some(1446));
        assert_eq!(oid.token(), "Story:1094:1446");
        assert_eq!(oid.to_string(), "Story:1094:1446");
    }

    #[test]
    fn momentless_strips_version_and_differs() {
        let oid = Oid::with_moment("Story", 1094, 1446);
        let stream = oid.momentless();
        assert!(stream.is_momentless());
        assert_ne!(stream, oid);
        assert_eq!(stream, Oid::new("Story", 1094));
    }

    #[test]
    fn momentless_of_momentless_is_identity() {
        let oid = Oid::new("Story", 7);
        assert_eq!(oid.momentless(), oid);
    }

    #[test]
    fn unknown_type_rejected() {
        let meta = sample_meta();
        let err = Oid::from_token("Nonesuch:1", &meta).unwrap_err();
        assert!(matches!(err, MetaError::UnknownAssetType { .. }));
    }

    #[test]
    fn malformed_tokens_rejected() {
        for bad in ["Story", "Story:abc", "Story:1:x", ":5", "Story:1:2:3"] {
            assert!(Oid::parse(bad).is_err(), "expected '{bad}' to fail");
        }
    }

    #[test]
    fn equality_requires_all_components() {
        assert_ne!(Oid::new("Story", 1), Oid::new("Defect", 1));
        assert_ne!(Oid::new("Story", 1), Oid::new("Story", 2));
        assert_ne!(
            Oid::with_moment("Story", 1, 5),
            Oid::with_moment("Story", 1, 6)
        );
        assert_eq!(
            Oid::with_moment("Story", 1, 5),
            Oid::with_moment("Story", 1, 5)
        );
    }
}
