use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved textual sentinel meaning "no player yet" (the zero address)
pub const UNSET_SENTINEL: &str = "0x0000000000000000000000000000000000000000";

/// Opaque, externally issued player token (e.g. a wallet address).
///
/// The ledger only ever compares identities. An unset seat is modelled as
/// `Option<Identity>::None`; the reserved sentinel and the empty string are
/// refused at parse time so a real identity can never equal "unset".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity(String);

impl Identity {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::InvalidIdentity("empty identity".to_string()));
        }
        if trimmed.eq_ignore_ascii_case(UNSET_SENTINEL) {
            return Err(ValidationError::InvalidIdentity(format!(
                "{trimmed} is the reserved unset sentinel"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl std::str::FromStr for Identity {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for Identity {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Identity> for String {
    fn from(value: Identity) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unset_sentinel() {
        assert!(Identity::parse(UNSET_SENTINEL).is_err());
        assert!(Identity::parse(&UNSET_SENTINEL.to_uppercase().replace("0X", "0x")).is_err());
        assert!(Identity::parse("   ").is_err());
    }

    #[test]
    fn test_trims_and_compares() {
        let a = Identity::parse(" 0xabc ").unwrap();
        let b: Identity = "0xabc".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabc");
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Identity = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(ok.as_str(), "alice");

        let bad = serde_json::from_str::<Identity>(&format!("\"{}\"", UNSET_SENTINEL));
        assert!(bad.is_err());
    }
}
