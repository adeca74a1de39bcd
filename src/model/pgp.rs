//! PGP key identifiers
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{AtlasError, Result};

/// Short (4 byte) or long (8 byte) PGP key ID. The empty ID means the
/// owner did not supply one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PgpId(Vec<u8>);

impl PgpId {
    /// Decode a hex key ID. Only 0, 8, or 16 hex characters are accepted.
    pub fn decode(s: &str) -> Result<Self> {
        match s.len() {
            0 | 8 | 16 => hex::decode(s)
                .map(PgpId)
                .map_err(|_| AtlasError::Validation("pgpInvalid".to_string())),
            _ => Err(AtlasError::Validation("pgpInvalid".to_string())),
        }
    }

    pub fn encode(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PgpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl Serialize for PgpId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for PgpId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PgpId::decode(&s).map_err(|_| serde::de::Error::custom("incorrectly formatted PGP ID"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        assert!(PgpId::decode("").unwrap().is_empty());
        assert_eq!(PgpId::decode("0123abcd").unwrap().as_bytes().len(), 4);
        assert_eq!(PgpId::decode("0123456789abcdef").unwrap().as_bytes().len(), 8);
        assert!(PgpId::decode("0123abc").is_err());
        assert!(PgpId::decode("0123abcd01").is_err());
        assert!(PgpId::decode("zzzzzzzz").is_err());
    }

    #[test]
    fn test_uppercase_hex_normalizes() {
        let id = PgpId::decode("0123ABCD").unwrap();
        assert_eq!(id.encode(), "0123abcd");
    }
}
