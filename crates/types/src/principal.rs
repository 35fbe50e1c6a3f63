use crate::TypesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of raw bytes in a principal identifier.
pub const PRINCIPAL_BYTES: usize = 32;
/// Length of the text form (prefix + 64 hex chars).
pub const PRINCIPAL_STRING_LENGTH: usize = 1 + PRINCIPAL_BYTES * 2;

const PRINCIPAL_PREFIX: char = 'i';

/// Account identity supplied by the host for every call.
///
/// The text form is the character `i` followed by the lowercase hex encoding
/// of the 32 raw bytes, and that is also how it appears in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(pub [u8; PRINCIPAL_BYTES]);

impl Principal {
    pub const fn new(bytes: [u8; PRINCIPAL_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PRINCIPAL_BYTES] {
        &self.0
    }

    /// Encode into the `i<hex>` text form.
    pub fn encode(&self) -> String {
        let mut encoded = String::with_capacity(PRINCIPAL_STRING_LENGTH);
        encoded.push(PRINCIPAL_PREFIX);
        encoded.push_str(&hex::encode(self.0));
        encoded
    }

    /// Decode the `i<hex>` text form.
    pub fn decode(value: &str) -> Result<Self, TypesError> {
        let Some(payload) = value.strip_prefix(PRINCIPAL_PREFIX) else {
            return Err(TypesError::InvalidPrefix);
        };

        if value.len() != PRINCIPAL_STRING_LENGTH {
            return Err(TypesError::InvalidLength {
                expected: PRINCIPAL_STRING_LENGTH,
                actual: value.len(),
            });
        }

        let mut bytes = [0u8; PRINCIPAL_BYTES];
        hex::decode_to_slice(payload, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Principal {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s.trim())
    }
}

impl From<[u8; PRINCIPAL_BYTES]> for Principal {
    fn from(value: [u8; PRINCIPAL_BYTES]) -> Self {
        Self(value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.encode()
    }
}

impl TryFrom<String> for Principal {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::decode(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_form_has_prefix_and_fixed_length() {
        let principal = Principal::new([0xAB; PRINCIPAL_BYTES]);
        let encoded = principal.encode();
        assert!(encoded.starts_with('i'));
        assert_eq!(encoded.len(), PRINCIPAL_STRING_LENGTH);
        assert_eq!(encoded.parse::<Principal>().expect("parse principal"), principal);
    }

    #[test]
    fn invalid_prefix_rejected() {
        let bad = "x".to_string() + &"00".repeat(PRINCIPAL_BYTES);
        assert!(matches!(
            Principal::decode(&bad).unwrap_err(),
            TypesError::InvalidPrefix
        ));
    }

    #[test]
    fn invalid_length_rejected() {
        let bad = "i".to_string() + &"00".repeat(PRINCIPAL_BYTES - 1);
        assert!(matches!(
            Principal::decode(&bad).unwrap_err(),
            TypesError::InvalidLength { .. }
        ));
    }

    #[test]
    fn invalid_hex_rejected() {
        let bad = format!("i{}", "zz".repeat(PRINCIPAL_BYTES));
        assert!(matches!(
            Principal::decode(&bad).unwrap_err(),
            TypesError::InvalidHex(_)
        ));
    }

    #[test]
    fn serializes_as_string() {
        let principal = Principal::new([1u8; PRINCIPAL_BYTES]);
        let json = serde_json::to_string(&principal).expect("serialize json");
        assert_eq!(json, format!("\"{}\"", principal.encode()));
        let back: Principal = serde_json::from_str(&json).expect("parse json");
        assert_eq!(back, principal);
    }
}
