//! Transaction propagation behaviors.
//!
//! A propagation behavior decides what a newly requested scope does relative
//! to the physical transaction already active in its context:
//! - join it,
//! - suspend it and start an independent one,
//! - open a savepoint in it,
//! - or run without one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Propagation behavior of a logical transaction scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the active transaction, or start a new one if there is none.
    #[default]
    Required,

    /// Join the active transaction, or run non-transactionally.
    Supports,

    /// Join the active transaction; fail if there is none.
    Mandatory,

    /// Always start an independent physical transaction on its own
    /// connection, suspending the active one until this scope ends.
    RequiresNew,

    /// Suspend the active transaction and run non-transactionally.
    NotSupported,

    /// Run non-transactionally; fail if a transaction is active.
    Never,

    /// Open a savepoint in the active transaction, or start a new one if
    /// there is none. Rolling back the scope only undoes work since the
    /// savepoint.
    Nested,
}

impl Propagation {
    /// All behaviors, in declaration order.
    pub const ALL: [Propagation; 7] = [
        Propagation::Required,
        Propagation::Supports,
        Propagation::Mandatory,
        Propagation::RequiresNew,
        Propagation::NotSupported,
        Propagation::Never,
        Propagation::Nested,
    ];

    /// Whether a scope with this behavior starts a physical transaction when
    /// none is active.
    pub fn starts_transaction(&self) -> bool {
        matches!(
            self,
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested
        )
    }

    /// Canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Propagation::Required => "REQUIRED",
            Propagation::Supports => "SUPPORTS",
            Propagation::Mandatory => "MANDATORY",
            Propagation::RequiresNew => "REQUIRES_NEW",
            Propagation::NotSupported => "NOT_SUPPORTED",
            Propagation::Never => "NEVER",
            Propagation::Nested => "NESTED",
        }
    }

    /// Get a human-readable description of this behavior.
    pub fn description(&self) -> &'static str {
        match self {
            Propagation::Required => "Join the current transaction, create one if none exists",
            Propagation::Supports => "Join the current transaction, run without one if none exists",
            Propagation::Mandatory => "Join the current transaction, fail if none exists",
            Propagation::RequiresNew => "Suspend the current transaction and start a new one",
            Propagation::NotSupported => "Suspend the current transaction and run without one",
            Propagation::Never => "Run without a transaction, fail if one exists",
            Propagation::Nested => "Open a savepoint in the current transaction, create one if none exists",
        }
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a propagation behavior from its name.
impl std::str::FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_uppercase()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .collect();
        let name = normalized.strip_prefix("PROPAGATION_").unwrap_or(&normalized);

        Propagation::ALL
            .into_iter()
            .find(|p| p.as_str() == name || p.as_str().replace('_', "") == name)
            .ok_or_else(|| format!("unknown propagation behavior: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_propagation() {
        assert_eq!(Propagation::default(), Propagation::Required);
    }

    #[test]
    fn test_parse_propagation() {
        assert_eq!(
            "REQUIRES_NEW".parse::<Propagation>().unwrap(),
            Propagation::RequiresNew
        );
        assert_eq!(
            "requires-new".parse::<Propagation>().unwrap(),
            Propagation::RequiresNew
        );
        assert_eq!(
            "PROPAGATION_NOT_SUPPORTED".parse::<Propagation>().unwrap(),
            Propagation::NotSupported
        );
        assert_eq!("nested".parse::<Propagation>().unwrap(), Propagation::Nested);
        assert_eq!("requiresnew".parse::<Propagation>().unwrap(), Propagation::RequiresNew);
        assert!("sometimes".parse::<Propagation>().is_err());
    }

    #[test]
    fn test_display_matches_parse() {
        for p in Propagation::ALL {
            assert_eq!(p.to_string().parse::<Propagation>().unwrap(), p);
        }
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Propagation::RequiresNew).unwrap();
        assert_eq!(json, "\"REQUIRES_NEW\"");
        let parsed: Propagation = serde_json::from_str("\"NOT_SUPPORTED\"").unwrap();
        assert_eq!(parsed, Propagation::NotSupported);
    }

    #[test]
    fn test_behavior_flags() {
        assert!(Propagation::Required.starts_transaction());
        assert!(!Propagation::Supports.starts_transaction());
        assert!(Propagation::Nested.starts_transaction());
        assert!(Propagation::ALL.iter().all(|p| !p.description().is_empty()));
    }
}
