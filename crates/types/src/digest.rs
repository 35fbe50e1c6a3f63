//! Fixed-size 32-byte values: identity-proof hashes and verifier proofs.

use crate::TypesError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Byte length of an identity hash and of a verifier proof.
pub const DIGEST_BYTES: usize = 32;

fn bytes_from_slice(bytes: &[u8]) -> Result<[u8; DIGEST_BYTES], TypesError> {
    bytes
        .try_into()
        .map_err(|_| TypesError::InvalidByteLength {
            expected: DIGEST_BYTES,
            actual: bytes.len(),
        })
}

fn bytes_from_hex(value: &str) -> Result<[u8; DIGEST_BYTES], TypesError> {
    let value = value.trim();
    let value = value.strip_prefix("0x").unwrap_or(value);
    if value.len() != DIGEST_BYTES * 2 {
        return Err(TypesError::InvalidLength {
            expected: DIGEST_BYTES * 2,
            actual: value.len(),
        });
    }
    let mut bytes = [0u8; DIGEST_BYTES];
    hex::decode_to_slice(value, &mut bytes)?;
    Ok(bytes)
}

/// Digest representing a principal's proof of identity.
///
/// The registry only ever compares these for equality; it never interprets
/// the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityHash(pub [u8; DIGEST_BYTES]);

impl IdentityHash {
    pub const fn new(bytes: [u8; DIGEST_BYTES]) -> Self {
        Self(bytes)
    }

    /// Build from an arbitrary slice, rejecting anything that is not exactly
    /// 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        bytes_from_slice(bytes).map(Self)
    }

    /// SHA-256 of a document, for hosts that derive the hash themselves.
    pub fn digest(document: &[u8]) -> Self {
        Self(Sha256::digest(document).into())
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self, TypesError> {
        bytes_from_hex(value).map(Self)
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for IdentityHash {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl AsRef<[u8]> for IdentityHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<IdentityHash> for String {
    fn from(value: IdentityHash) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for IdentityHash {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// Opaque proof blob passed through to an external verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Proof(pub [u8; DIGEST_BYTES]);

impl Proof {
    pub const fn new(bytes: [u8; DIGEST_BYTES]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypesError> {
        bytes_from_slice(bytes).map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_BYTES] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(value: &str) -> Result<Self, TypesError> {
        bytes_from_hex(value).map(Self)
    }
}

impl fmt::Display for Proof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Proof {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<Proof> for String {
    fn from(value: Proof) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for Proof {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slice_requires_exact_length() {
        assert!(IdentityHash::from_slice(&[0xAA; 32]).is_ok());

        let err = IdentityHash::from_slice(&[0xAA; 31]).unwrap_err();
        assert!(matches!(
            err,
            TypesError::InvalidByteLength {
                expected: 32,
                actual: 31
            }
        ));
        assert!(IdentityHash::from_slice(&[0xAA; 33]).is_err());
        assert!(Proof::from_slice(&[]).is_err());
    }

    #[test]
    fn hex_accepts_optional_0x_prefix() {
        let plain = IdentityHash::from_hex(&"ab".repeat(32)).expect("decode hex");
        let prefixed =
            IdentityHash::from_hex(&format!("0x{}", "ab".repeat(32))).expect("decode hex");
        assert_eq!(plain, prefixed);
        assert_eq!(plain, IdentityHash::new([0xAB; 32]));
    }

    #[test]
    fn hex_rejects_short_input() {
        let err = IdentityHash::from_hex("abcd").unwrap_err();
        assert!(matches!(err, TypesError::InvalidLength { .. }));
    }

    #[test]
    fn digest_is_sha256() {
        let hash = IdentityHash::digest(b"abc");
        assert_eq!(
            hash.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
