//! Value types shared by the identity registry and its hosts.

pub mod digest;
pub mod principal;

pub use digest::*;
pub use principal::*;

/// Errors raised while decoding principals, hashes and proofs.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("principal must start with 'i'")]
    InvalidPrefix,
    #[error("expected {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("expected {expected} bytes, got {actual}")]
    InvalidByteLength { expected: usize, actual: usize },
    #[error("payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
}
