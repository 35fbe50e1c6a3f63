//! Types for the identity registry

use idreg_types::{IdentityHash, Principal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata limit applied when no other value is configured.
pub const DEFAULT_MAX_METADATA_SIZE: usize = 128;

/// Host-supplied context of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    /// Principal making the call
    pub caller: Principal,
    /// Current logical time
    pub block_height: u64,
}

impl CallContext {
    pub fn new(caller: Principal, block_height: u64) -> Self {
        Self {
            caller,
            block_height,
        }
    }
}

/// One registration per principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Identity-proof digest, unique across all principals
    pub hash: IdentityHash,
    /// Block height of registration or last update
    pub registered_at: u64,
    /// Record is valid while the current height is strictly below this
    pub expiry: u64,
    /// Opaque caller data
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_bytes")]
    pub metadata: Option<Vec<u8>>,
    /// One-way flag
    pub revoked: bool,
}

impl IdentityRecord {
    pub fn status_at(&self, block_height: u64) -> RecordStatus {
        if self.revoked {
            RecordStatus::Revoked
        } else if block_height >= self.expiry {
            RecordStatus::Expired
        } else {
            RecordStatus::Active
        }
    }

    pub fn is_live_at(&self, block_height: u64) -> bool {
        self.status_at(block_height) == RecordStatus::Active
    }
}

/// Derived lifecycle of a record. `Expired` is never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Revoked,
    Expired,
}

/// Versioned on-chain configuration, changed only by the admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub admin: Principal,
    pub paused: bool,
    pub max_metadata_size: usize,
    /// Bumped by every committed admin change
    pub version: u64,
}

impl RegistryConfig {
    pub fn new(admin: Principal) -> Self {
        Self {
            admin,
            paused: false,
            max_metadata_size: DEFAULT_MAX_METADATA_SIZE,
            version: 1,
        }
    }

    pub fn with_max_metadata_size(mut self, max_metadata_size: usize) -> Self {
        self.max_metadata_size = max_metadata_size;
        self
    }
}

/// Emitted once per committed mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RegistryEvent {
    IdentityRegistered {
        principal: Principal,
        hash: IdentityHash,
        expiry: u64,
        block_height: u64,
    },
    IdentityUpdated {
        principal: Principal,
        old_hash: IdentityHash,
        new_hash: IdentityHash,
        expiry: u64,
        block_height: u64,
    },
    IdentityRevoked {
        principal: Principal,
        hash: IdentityHash,
        block_height: u64,
    },
    Paused {
        by: Principal,
        block_height: u64,
    },
    Unpaused {
        by: Principal,
        block_height: u64,
    },
    AdminChanged {
        previous: Principal,
        new_admin: Principal,
        block_height: u64,
    },
    MaxMetadataSizeChanged {
        previous: usize,
        new_size: usize,
        block_height: u64,
    },
}

/// Aggregate counters over the registry tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub identities: usize,
    pub revoked: usize,
    pub hash_reservations: usize,
}

/// Serializable copy of the whole registry state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub config: RegistryConfig,
    #[serde(default)]
    pub identities: BTreeMap<Principal, IdentityRecord>,
    #[serde(default)]
    pub hash_owners: BTreeMap<IdentityHash, Principal>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_str(&hex::encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| hex::decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
