//! Unique identifiers for evoloop entities.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Ulid);

        impl $name {
            /// Generate a fresh identifier.
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl std::str::FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }
    };
}

ulid_id!(
    /// Identifier of a single inference request seen by the telemetry store.
    RequestId
);
ulid_id!(
    /// Identifier of an evolution candidate.
    CandidateId
);
ulid_id!(
    /// Identifier of one evolution cycle.
    CycleId
);
ulid_id!(
    /// Identifier of an audit entry.
    AuditId
);

/// Registry version number.
///
/// Versions are assigned in strictly increasing order; the root (base)
/// model is always version 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionId(pub u64);

impl VersionId {
    /// The base model.
    pub const ROOT: VersionId = VersionId(0);

    /// Whether this is the root version.
    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }

    /// The version that follows this one.
    pub fn next(self) -> Self {
        VersionId(self.0 + 1)
    }
}

impl std::fmt::Display for VersionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl std::str::FromStr for VersionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('v').unwrap_or(s);
        Ok(VersionId(digits.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_id_parse_and_display() {
        let v: VersionId = "v12".parse().unwrap();
        assert_eq!(v, VersionId(12));
        assert_eq!(v.to_string(), "v12");
        assert_eq!("7".parse::<VersionId>().unwrap(), VersionId(7));
        assert!("vx".parse::<VersionId>().is_err());
    }

    #[test]
    fn test_root_and_next() {
        assert!(VersionId::ROOT.is_root());
        assert_eq!(VersionId::ROOT.next(), VersionId(1));
        assert!(!VersionId(3).is_root());
    }

    #[test]
    fn test_ulid_ids_roundtrip_through_str() {
        let id = CandidateId::new();
        let parsed: CandidateId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
