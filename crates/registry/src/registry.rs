//! Identity registry implementation
//!
//! Every mutating call runs inside a `RegistryTransaction` under the single
//! write lock: preconditions are checked against committed state plus the
//! writes staged so far, and nothing becomes visible unless the whole call
//! succeeds.

use crate::errors::*;
use crate::transaction::{RegistryState, RegistryTransaction};
use crate::types::*;
use crate::verifier::IdentityVerifier;
use idreg_types::{IdentityHash, Principal, Proof};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Upper bound on how long an external verifier may take.
pub const DEFAULT_VERIFIER_TIMEOUT: Duration = Duration::from_secs(5);

/// Identity registry
///
/// Maps each principal to at most one `IdentityRecord` and keeps the
/// hash → principal reverse index that enforces global hash uniqueness.
/// Clones share the same underlying state.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    state: Arc<RwLock<RegistryState>>,
    verifier_timeout: Duration,
}

impl IdentityRegistry {
    /// Create an empty registry administered by the deploying principal.
    pub fn new(admin: Principal) -> Self {
        Self::with_config(RegistryConfig::new(admin))
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(RegistryState::new(config))),
            verifier_timeout: DEFAULT_VERIFIER_TIMEOUT,
        }
    }

    pub fn with_verifier_timeout(mut self, verifier_timeout: Duration) -> Self {
        self.verifier_timeout = verifier_timeout;
        self
    }

    /// Register the caller's identity hash.
    pub fn register(
        &self,
        ctx: &CallContext,
        hash: impl AsRef<[u8]>,
        expiry: u64,
        metadata: Option<Vec<u8>>,
    ) -> Result<()> {
        self.execute(ctx, "register", |tx| {
            ensure_not_paused(tx)?;
            let hash = validate_submission(
                tx.config(),
                ctx.block_height,
                hash.as_ref(),
                expiry,
                metadata.as_deref(),
            )?;

            if tx.hash_owner(&hash).is_some() {
                return Err(RegistryError::DuplicateIdentity);
            }
            // Revoked records still occupy the slot.
            if tx.identity(&ctx.caller).is_some() {
                return Err(RegistryError::DuplicateIdentity);
            }

            tx.put_identity(
                ctx.caller,
                IdentityRecord {
                    hash,
                    registered_at: ctx.block_height,
                    expiry,
                    metadata,
                    revoked: false,
                },
            );
            tx.reserve_hash(hash, ctx.caller);
            tx.emit(RegistryEvent::IdentityRegistered {
                principal: ctx.caller,
                hash,
                expiry,
                block_height: ctx.block_height,
            });
            Ok(())
        })
    }

    /// Replace the caller's record with a new hash, expiry and metadata.
    ///
    /// The old reservation is released before the new hash is checked, so a
    /// caller may resubmit their current hash. If the new hash belongs to
    /// someone else the call fails and the old reservation stays in place.
    /// Expired (but not revoked) records can be updated.
    pub fn update(
        &self,
        ctx: &CallContext,
        new_hash: impl AsRef<[u8]>,
        new_expiry: u64,
        new_metadata: Option<Vec<u8>>,
    ) -> Result<()> {
        self.execute(ctx, "update", |tx| {
            ensure_not_paused(tx)?;
            let old_hash = unrevoked_hash(tx, &ctx.caller)?;
            let new_hash = validate_submission(
                tx.config(),
                ctx.block_height,
                new_hash.as_ref(),
                new_expiry,
                new_metadata.as_deref(),
            )?;

            tx.release_hash(old_hash);
            if tx.hash_owner(&new_hash).is_some() {
                return Err(RegistryError::DuplicateIdentity);
            }

            tx.put_identity(
                ctx.caller,
                IdentityRecord {
                    hash: new_hash,
                    registered_at: ctx.block_height,
                    expiry: new_expiry,
                    metadata: new_metadata,
                    revoked: false,
                },
            );
            tx.reserve_hash(new_hash, ctx.caller);
            tx.emit(RegistryEvent::IdentityUpdated {
                principal: ctx.caller,
                old_hash,
                new_hash,
                expiry: new_expiry,
                block_height: ctx.block_height,
            });
            Ok(())
        })
    }

    /// Permanently revoke the caller's identity. The hash stays reserved.
    pub fn revoke(&self, ctx: &CallContext) -> Result<()> {
        self.execute(ctx, "revoke", |tx| {
            ensure_not_paused(tx)?;
            unrevoked_hash(tx, &ctx.caller)?;

            let mut record = tx
                .identity(&ctx.caller)
                .cloned()
                .ok_or(RegistryError::NotRegistered)?;
            record.revoked = true;
            let hash = record.hash;
            tx.put_identity(ctx.caller, record);
            tx.emit(RegistryEvent::IdentityRevoked {
                principal: ctx.caller,
                hash,
                block_height: ctx.block_height,
            });
            Ok(())
        })
    }

    pub fn pause(&self, ctx: &CallContext) -> Result<()> {
        self.execute_admin(ctx, "pause", |tx| {
            tx.config_mut().paused = true;
            tx.emit(RegistryEvent::Paused {
                by: ctx.caller,
                block_height: ctx.block_height,
            });
            Ok(())
        })
    }

    pub fn unpause(&self, ctx: &CallContext) -> Result<()> {
        self.execute_admin(ctx, "unpause", |tx| {
            tx.config_mut().paused = false;
            tx.emit(RegistryEvent::Unpaused {
                by: ctx.caller,
                block_height: ctx.block_height,
            });
            Ok(())
        })
    }

    /// Hand admin rights to `new_admin`.
    pub fn set_admin(&self, ctx: &CallContext, new_admin: Principal) -> Result<()> {
        self.execute_admin(ctx, "set_admin", |tx| {
            let previous = std::mem::replace(&mut tx.config_mut().admin, new_admin);
            tx.emit(RegistryEvent::AdminChanged {
                previous,
                new_admin,
                block_height: ctx.block_height,
            });
            Ok(())
        })
    }

    /// Change the metadata limit. Any value is accepted from the admin.
    pub fn set_max_metadata_size(&self, ctx: &CallContext, new_size: usize) -> Result<()> {
        self.execute_admin(ctx, "set_max_metadata_size", |tx| {
            let previous = std::mem::replace(&mut tx.config_mut().max_metadata_size, new_size);
            tx.emit(RegistryEvent::MaxMetadataSizeChanged {
                previous,
                new_size,
                block_height: ctx.block_height,
            });
            Ok(())
        })
    }

    /// True iff the principal holds a record that is neither revoked nor
    /// expired at `block_height`.
    pub fn is_registered(&self, principal: &Principal, block_height: u64) -> bool {
        self.state
            .read()
            .identities
            .get(principal)
            .is_some_and(|record| record.is_live_at(block_height))
    }

    /// Fetch a live record.
    pub fn get_details(&self, principal: &Principal, block_height: u64) -> Result<IdentityRecord> {
        let state = self.state.read();
        let record = state
            .identities
            .get(principal)
            .ok_or(RegistryError::NotRegistered)?;

        match record.status_at(block_height) {
            RecordStatus::Active => Ok(record.clone()),
            RecordStatus::Revoked => Err(RegistryError::AlreadyRevoked),
            RecordStatus::Expired => {
                debug!(%principal, expiry = record.expiry, block_height, "record expired");
                Err(RegistryError::RegistrationExpired)
            }
        }
    }

    pub fn get_hash(&self, principal: &Principal, block_height: u64) -> Result<IdentityHash> {
        self.get_details(principal, block_height)
            .map(|record| record.hash)
    }

    /// Reverse lookup. Revoked identities keep their reservation.
    pub fn get_owner_of_hash(&self, hash: &IdentityHash) -> Option<Principal> {
        self.state.read().hash_owners.get(hash).copied()
    }

    /// Check that `principal` holds a live record, then ask `verifier` for a
    /// verdict on `proof`.
    pub async fn verify_with_external_verifier(
        &self,
        principal: &Principal,
        verifier: &dyn IdentityVerifier,
        proof: &Proof,
        block_height: u64,
    ) -> std::result::Result<bool, VerificationError> {
        self.get_details(principal, block_height)?;

        let verdict = timeout(self.verifier_timeout, verifier.verify(principal, proof))
            .await
            .map_err(|_| VerifierError::Timeout)??;

        debug!(%principal, verdict, "external verification finished");
        Ok(verdict)
    }

    /// Lifecycle of a principal's record, if any.
    pub fn status_of(&self, principal: &Principal, block_height: u64) -> Option<RecordStatus> {
        self.state
            .read()
            .identities
            .get(principal)
            .map(|record| record.status_at(block_height))
    }

    pub fn config(&self) -> RegistryConfig {
        self.state.read().config.clone()
    }

    pub fn admin(&self) -> Principal {
        self.state.read().config.admin
    }

    pub fn is_paused(&self) -> bool {
        self.state.read().config.paused
    }

    pub fn max_metadata_size(&self) -> usize {
        self.state.read().config.max_metadata_size
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.read();
        RegistryStats {
            identities: state.identities.len(),
            revoked: state.identities.values().filter(|r| r.revoked).count(),
            hash_reservations: state.hash_owners.len(),
        }
    }

    /// Events of all committed mutations, oldest first.
    pub fn events(&self) -> Vec<RegistryEvent> {
        self.state.read().events.clone()
    }

    pub fn drain_events(&self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.state.write().events)
    }

    /// Copy out both tables and the configuration. The event log is not
    /// part of the snapshot.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read();
        RegistrySnapshot {
            config: state.config.clone(),
            identities: state
                .identities
                .iter()
                .map(|(principal, record)| (*principal, record.clone()))
                .collect(),
            hash_owners: state
                .hash_owners
                .iter()
                .map(|(hash, owner)| (*hash, *owner))
                .collect(),
        }
    }

    /// Rebuild a registry from a snapshot, rejecting it unless every record
    /// and every reservation point at each other.
    pub fn from_snapshot(
        snapshot: RegistrySnapshot,
    ) -> std::result::Result<Self, SnapshotError> {
        for (hash, owner) in &snapshot.hash_owners {
            let carries_hash = snapshot
                .identities
                .get(owner)
                .is_some_and(|record| record.hash == *hash);
            if !carries_hash {
                return Err(SnapshotError::DanglingReservation {
                    hash: *hash,
                    owner: *owner,
                });
            }
        }

        for (principal, record) in &snapshot.identities {
            if snapshot.hash_owners.get(&record.hash) != Some(principal) {
                return Err(SnapshotError::MissingReservation {
                    principal: *principal,
                    hash: record.hash,
                });
            }
        }

        let mut state = RegistryState::new(snapshot.config);
        state.identities = snapshot.identities.into_iter().collect();
        state.hash_owners = snapshot.hash_owners.into_iter().collect();

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            verifier_timeout: DEFAULT_VERIFIER_TIMEOUT,
        })
    }

    /// Run `operation` atomically: its staged writes are committed only if
    /// it returns `Ok`.
    fn execute<T>(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        f: impl FnOnce(&mut RegistryTransaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.write();
        let mut tx = RegistryTransaction::new(&state);

        match f(&mut tx) {
            Ok(value) => {
                tx.into_changes().apply(&mut state);
                info!(
                    operation,
                    caller = %ctx.caller,
                    block_height = ctx.block_height,
                    "registry call committed"
                );
                Ok(value)
            }
            Err(err) => {
                warn!(
                    operation,
                    caller = %ctx.caller,
                    block_height = ctx.block_height,
                    code = err.code(),
                    "registry call rejected: {}",
                    err
                );
                Err(err)
            }
        }
    }

    fn execute_admin(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        f: impl FnOnce(&mut RegistryTransaction<'_>) -> Result<()>,
    ) -> Result<()> {
        self.execute(ctx, operation, |tx| {
            if tx.config().admin != ctx.caller {
                return Err(RegistryError::Unauthorized);
            }
            f(tx)
        })
    }
}

fn ensure_not_paused(tx: &RegistryTransaction<'_>) -> Result<()> {
    if tx.config().paused {
        return Err(RegistryError::ContractPaused);
    }
    Ok(())
}

/// Hash of the caller's record, provided it exists and is not revoked.
fn unrevoked_hash(tx: &RegistryTransaction<'_>, caller: &Principal) -> Result<IdentityHash> {
    match tx.identity(caller) {
        None => Err(RegistryError::NotRegistered),
        Some(record) if record.revoked => Err(RegistryError::AlreadyRevoked),
        Some(record) => Ok(record.hash),
    }
}

fn validate_submission(
    config: &RegistryConfig,
    block_height: u64,
    hash: &[u8],
    expiry: u64,
    metadata: Option<&[u8]>,
) -> Result<IdentityHash> {
    let hash = IdentityHash::from_slice(hash).map_err(|_| RegistryError::InvalidHash)?;

    if expiry <= block_height {
        return Err(RegistryError::InvalidExpiry);
    }

    if metadata.is_some_and(|m| m.len() > config.max_metadata_size) {
        return Err(RegistryError::InvalidMetadata);
    }

    Ok(hash)
}
