//! Identity registry
//!
//! A principal registers a unique 32-byte identity-proof hash, may replace or
//! revoke it, and anyone can check registration status and hash ownership.
//! The host supplies the caller and the current block height for each call;
//! the registry supplies validation and all-or-nothing application of writes.

mod transaction;

pub mod errors;
pub mod registry;
pub mod types;
pub mod verifier;

pub use errors::*;
pub use idreg_types::{IdentityHash, Principal, Proof};
pub use registry::{IdentityRegistry, DEFAULT_VERIFIER_TIMEOUT};
pub use types::*;
pub use verifier::{IdentityVerifier, StubVerifier};
