//! Error types for the identity registry

use idreg_types::{IdentityHash, Principal};
use thiserror::Error;

/// Business-rule failures of registry operations.
///
/// The set is closed and every variant carries a stable numeric code so
/// hosts written in other languages can match on it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("identity already registered for caller or hash already reserved")]
    DuplicateIdentity,

    #[error("identity hash must be exactly 32 bytes")]
    InvalidHash,

    #[error("principal has no registered identity")]
    NotRegistered,

    #[error("identity has been revoked")]
    AlreadyRevoked,

    /// Reserved; no current operation returns it.
    #[error("caller does not own this identity")]
    NotOwner,

    /// Reserved; no current operation returns it.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("identity registration has expired")]
    RegistrationExpired,

    #[error("metadata exceeds the configured maximum size")]
    InvalidMetadata,

    #[error("registry is paused")]
    ContractPaused,

    #[error("caller is not the registry admin")]
    Unauthorized,

    #[error("expiry must be later than the current block height")]
    InvalidExpiry,
}

impl RegistryError {
    pub const ALL: [RegistryError; 11] = [
        RegistryError::DuplicateIdentity,
        RegistryError::InvalidHash,
        RegistryError::NotRegistered,
        RegistryError::AlreadyRevoked,
        RegistryError::NotOwner,
        RegistryError::InvalidTimestamp,
        RegistryError::RegistrationExpired,
        RegistryError::InvalidMetadata,
        RegistryError::ContractPaused,
        RegistryError::Unauthorized,
        RegistryError::InvalidExpiry,
    ];

    /// Stable wire code.
    pub const fn code(&self) -> u32 {
        match self {
            RegistryError::DuplicateIdentity => 100,
            RegistryError::InvalidHash => 101,
            RegistryError::NotRegistered => 102,
            RegistryError::AlreadyRevoked => 103,
            RegistryError::NotOwner => 104,
            RegistryError::InvalidTimestamp => 105,
            RegistryError::RegistrationExpired => 106,
            RegistryError::InvalidMetadata => 107,
            RegistryError::ContractPaused => 108,
            RegistryError::Unauthorized => 109,
            RegistryError::InvalidExpiry => 110,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|err| err.code() == code)
    }

    /// Symbolic name, e.g. `ERR_DUPLICATE_IDENTITY`.
    pub const fn symbol(&self) -> &'static str {
        match self {
            RegistryError::DuplicateIdentity => "ERR_DUPLICATE_IDENTITY",
            RegistryError::InvalidHash => "ERR_INVALID_HASH",
            RegistryError::NotRegistered => "ERR_NOT_REGISTERED",
            RegistryError::AlreadyRevoked => "ERR_ALREADY_REVOKED",
            RegistryError::NotOwner => "ERR_NOT_OWNER",
            RegistryError::InvalidTimestamp => "ERR_INVALID_TIMESTAMP",
            RegistryError::RegistrationExpired => "ERR_REGISTRATION_EXPIRED",
            RegistryError::InvalidMetadata => "ERR_INVALID_METADATA",
            RegistryError::ContractPaused => "ERR_CONTRACT_PAUSED",
            RegistryError::Unauthorized => "ERR_UNAUTHORIZED",
            RegistryError::InvalidExpiry => "ERR_INVALID_EXPIRY",
        }
    }
}

/// Failures signalled by an external verifier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifierError {
    #[error("verifier rejected the request with code {code}")]
    Rejected { code: u32 },

    #[error("verifier backend error: {0}")]
    Backend(String),

    #[error("verifier did not answer in time")]
    Timeout,
}

impl From<anyhow::Error> for VerifierError {
    fn from(value: anyhow::Error) -> Self {
        Self::Backend(value.to_string())
    }
}

/// Outcome of `verify_with_external_verifier` when it does not produce a
/// verdict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Verifier(#[from] VerifierError),
}

/// Reasons a snapshot cannot be restored.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("hash {hash} is reserved for {owner}, whose record does not carry it")]
    DanglingReservation {
        hash: IdentityHash,
        owner: Principal,
    },

    #[error("record of {principal} has no matching reservation for hash {hash}")]
    MissingReservation {
        principal: Principal,
        hash: IdentityHash,
    },

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
