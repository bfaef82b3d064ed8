//! Identifier and concurrency-token newtypes

use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

/// Unique entity identifier, assigned by the write pipeline on create
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub Uuid);

impl EntityId {
    /// Generate new entity ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The all-zero id some callers send instead of omitting the field
    #[inline]
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Opaque optimistic-concurrency token issued by the document store
///
/// Tokens compare case-insensitively; callers routinely echo them back
/// through layers that normalise casing.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    /// Wrap a raw token value
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Issue a fresh token
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("\"{}\"", Ulid::new()))
    }

    /// Raw token text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive token comparison
    #[inline]
    #[must_use]
    pub fn matches(&self, other: &ETag) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl PartialEq for ETag {
    fn eq(&self, other: &Self) -> bool {
        self.matches(other)
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Correlation identifier shared by every history item of one commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub Ulid);

impl CorrelationId {
    /// Generate new correlation ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Acting principal (user object id or alias) recorded in tracking details
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(String);

impl PrincipalId {
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_matches_ignoring_case() {
        let stored = ETag::new("\"0A1B2C\"");
        let echoed = ETag::new("\"0a1b2c\"");
        assert!(stored.matches(&echoed));
        assert_eq!(stored, echoed);
        assert!(!stored.matches(&ETag::new("\"0a1b2d\"")));
    }

    #[test]
    fn generated_etags_are_unique() {
        assert_ne!(ETag::generate(), ETag::generate());
    }

    #[test]
    fn entity_id_round_trips_through_display() {
        let id = EntityId::new();
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(!id.is_nil());
    }
}
