//! Principal: the canonical, scheme-prefixed blockchain-address identity
//! (spec §3). Validation is delegated to
//! [`snap2p_crypto::principal::is_well_formed_principal`]; this module adds
//! the newtype, `FromStr`/`Display`, and structural equality spec §3
//! requires ("Immutable value; equality is structural. Constructed only via
//! validation; invalid inputs fail with a parse error.").

use std::fmt;
use std::str::FromStr;

/// A validated `stacks:<ADDR>` principal string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Principal(String);

/// A principal string failed the `stacks:S[A-Z0-9]{39,40}` shape check.
#[derive(Debug, Clone, thiserror::Error)]
#[error("malformed principal: {0:?}")]
pub struct PrincipalParseError(pub String);

impl Principal {
    /// The full `stacks:<ADDR>` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `<ADDR>` portion, without the `stacks:` scheme prefix.
    #[must_use]
    pub fn addr(&self) -> &str {
        self.0.strip_prefix("stacks:").unwrap_or(&self.0)
    }
}

impl FromStr for Principal {
    type Err = PrincipalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if snap2p_crypto::principal::is_well_formed_principal(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(PrincipalParseError(s.to_string()))
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
