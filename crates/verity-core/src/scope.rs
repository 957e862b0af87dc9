//! Resource lifetime scopes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::VerityError;

/// Lifetime and sharing policy of a resolved resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One instance per test case identity
    Case,
    /// One instance per resolver lifetime
    Session,
}

impl Scope {
    /// Lowercase name of the scope
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Case => "case",
            Scope::Session => "session",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = VerityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "case" => Ok(Scope::Case),
            "session" => Ok(Scope::Session),
            other => Err(VerityError::invalid(format!("unknown scope '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("CASE".parse::<Scope>().unwrap(), Scope::Case);
        assert_eq!("session".parse::<Scope>().unwrap(), Scope::Session);
        assert!("suite".parse::<Scope>().is_err());
    }
}
