//! Transaction propagation policies.
//!
//! Two policies are supported:
//! - Required: join the current transaction, or start one if there is none
//! - RequiresNew: always start an independent transaction, suspending the current one

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a new scope relates to a transaction already in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Propagation {
    /// Join the current physical transaction if there is one.
    ///
    /// A joining scope is a participant: its commit does nothing and its
    /// rollback only marks the shared transaction rollback-only. The scope
    /// that started the transaction makes the final call.
    #[default]
    Required,

    /// Always run in a fresh physical transaction.
    ///
    /// The current transaction (if any) is suspended until this scope ends.
    /// The outcome of either transaction never affects the other.
    RequiresNew,
}

impl Propagation {
    /// Whether this policy always starts a new physical transaction.
    pub fn always_new(&self) -> bool {
        matches!(self, Propagation::RequiresNew)
    }
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Propagation::Required => write!(f, "REQUIRED"),
            Propagation::RequiresNew => write!(f, "REQUIRES_NEW"),
        }
    }
}

impl std::str::FromStr for Propagation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REQUIRED" => Ok(Propagation::Required),
            "REQUIRES_NEW" | "REQUIRES NEW" | "REQUIRESNEW" => Ok(Propagation::RequiresNew),
            _ => Err(format!("unknown propagation: {}", s)),
        }
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
    fn test_always_new() {
        assert!(Propagation::RequiresNew.always_new());
        assert!(!Propagation::Required.always_new());
    }

    #[test]
    fn test_parse_propagation() {
        assert_eq!("required".parse::<Propagation>().unwrap(), Propagation::Required);
        assert_eq!(
            "REQUIRES_NEW".parse::<Propagation>().unwrap(),
            Propagation::RequiresNew
        );
        assert!("nested".parse::<Propagation>().is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Propagation::RequiresNew).unwrap();
        assert_eq!(json, "\"REQUIRES_NEW\"");
        assert_eq!(Propagation::RequiresNew.to_string(), "REQUIRES_NEW");
    }
}
