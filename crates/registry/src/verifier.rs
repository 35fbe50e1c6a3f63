use crate::errors::VerifierError;
use async_trait::async_trait;
use idreg_types::{Principal, Proof};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Pluggable verification policy, e.g. an oracle-backed check.
///
/// The registry only makes sure the principal holds a live record before
/// delegating; the verdict is entirely the verifier's.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, principal: &Principal, proof: &Proof) -> Result<bool, VerifierError>;
}

/// In-memory verifier that approves a fixed set of (principal, proof) pairs.
#[derive(Clone, Default)]
pub struct StubVerifier {
    approved: Arc<RwLock<HashSet<(Principal, Proof)>>>,
    failure: Arc<RwLock<Option<VerifierError>>>,
}

impl StubVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self, principal: Principal, proof: Proof) {
        self.approved.write().insert((principal, proof));
    }

    /// Make every subsequent call fail with `error`.
    pub fn fail_with(&self, error: VerifierError) {
        *self.failure.write() = Some(error);
    }

    pub fn clear_failure(&self) {
        self.failure.write().take();
    }
}

#[async_trait]
impl IdentityVerifier for StubVerifier {
    async fn verify(&self, principal: &Principal, proof: &Proof) -> Result<bool, VerifierError> {
        let failure = self.failure.read().clone();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(self.approved.read().contains(&(*principal, *proof)))
    }
}
