//! Staged writes for a single registry invocation.
//!
//! A `RegistryTransaction` reads through to committed state and buffers every
//! write. Committing turns it into a `ChangeSet` that is applied under the same
//! write lock; dropping it discards everything.

use crate::types::*;
use idreg_types::{IdentityHash, Principal};
use std::collections::HashMap;

/// Committed registry state.
#[derive(Debug, Clone)]
pub(crate) struct RegistryState {
    pub identities: HashMap<Principal, IdentityRecord>,
    pub hash_owners: HashMap<IdentityHash, Principal>,
    pub config: RegistryConfig,
    pub events: Vec<RegistryEvent>,
}

impl RegistryState {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            identities: HashMap::new(),
            hash_owners: HashMap::new(),
            config,
            events: Vec::new(),
        }
    }
}

pub(crate) struct RegistryTransaction<'a> {
    base: &'a RegistryState,
    identities: HashMap<Principal, IdentityRecord>,
    /// `None` marks a released reservation
    hash_owners: HashMap<IdentityHash, Option<Principal>>,
    config: Option<RegistryConfig>,
    events: Vec<RegistryEvent>,
}

impl<'a> RegistryTransaction<'a> {
    pub fn new(base: &'a RegistryState) -> Self {
        Self {
            base,
            identities: HashMap::new(),
            hash_owners: HashMap::new(),
            config: None,
            events: Vec::new(),
        }
    }

    pub fn identity(&self, principal: &Principal) -> Option<&IdentityRecord> {
        self.identities
            .get(principal)
            .or_else(|| self.base.identities.get(principal))
    }

    pub fn put_identity(&mut self, principal: Principal, record: IdentityRecord) {
        self.identities.insert(principal, record);
    }

    pub fn hash_owner(&self, hash: &IdentityHash) -> Option<Principal> {
        match self.hash_owners.get(hash) {
            Some(staged) => *staged,
            None => self.base.hash_owners.get(hash).copied(),
        }
    }

    pub fn reserve_hash(&mut self, hash: IdentityHash, owner: Principal) {
        self.hash_owners.insert(hash, Some(owner));
    }

    pub fn release_hash(&mut self, hash: IdentityHash) {
        self.hash_owners.insert(hash, None);
    }

    pub fn config(&self) -> &RegistryConfig {
        self.config.as_ref().unwrap_or(&self.base.config)
    }

    /// Copy-on-write access to the configuration record.
    pub fn config_mut(&mut self) -> &mut RegistryConfig {
        let base = &self.base.config;
        self.config.get_or_insert_with(|| base.clone())
    }

    pub fn emit(&mut self, event: RegistryEvent) {
        self.events.push(event);
    }

    pub fn into_changes(self) -> ChangeSet {
        ChangeSet {
            identities: self.identities,
            hash_owners: self.hash_owners,
            config: self.config,
            events: self.events,
        }
    }
}

/// Writes of a successful transaction, detached from the state borrow.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    identities: HashMap<Principal, IdentityRecord>,
    hash_owners: HashMap<IdentityHash, Option<Principal>>,
    config: Option<RegistryConfig>,
    events: Vec<RegistryEvent>,
}

impl ChangeSet {
    pub fn apply(self, state: &mut RegistryState) {
        state.identities.extend(self.identities);

        for (hash, owner) in self.hash_owners {
            match owner {
                Some(owner) => {
                    state.hash_owners.insert(hash, owner);
                }
                None => {
                    state.hash_owners.remove(&hash);
                }
            }
        }

        if let Some(mut config) = self.config {
            config.version = state.config.version + 1;
            state.config = config;
        }

        state.events.extend(self.events);
    }
}
