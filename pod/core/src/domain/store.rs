// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Durable store ports.
//!
//! Two views over the same embedded database: [`PodStore`] for the channel's
//! own state (bindings, member grants) and [`KeyStore`] for the key material
//! the provisioner and the encryption engine persist. Session and account
//! blobs are opaque to the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::access::AccessMode;
use crate::domain::binding::BindingState;
use crate::domain::engine::SessionAddress;
use crate::domain::identity::Did;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),

    #[error("corrupt record under {0}")]
    Corrupt(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// The singular signed prekey: rotation replaces it, never appends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPrekeyRecord {
    pub id: u32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
    pub rotated_at: DateTime<Utc>,
}

/// Channel state: binding machine and member grants.
pub trait PodStore: Send + Sync {
    /// Current binding state for a DID; absence reads as `Unbound`.
    fn binding_state(&self, did: &Did) -> Result<BindingState, StoreError>;

    fn put_binding_state(&self, did: &Did, state: &BindingState) -> Result<(), StoreError>;

    /// Resolve a member grant. Absent, truncated, or out-of-range records
    /// resolve to `NotApplicant`, never a decode error.
    fn member_access_mode(&self, did: &Did) -> Result<AccessMode, StoreError>;

    fn update_member_access_mode(&self, did: &Did, mode: AccessMode) -> Result<(), StoreError>;

    fn remove_member(&self, did: &Did) -> Result<(), StoreError>;
}

/// Key material owned by the provisioner and the encryption engine.
pub trait KeyStore: Send + Sync {
    fn registration_id(&self) -> Result<Option<u32>, StoreError>;
    fn set_registration_id(&self, id: u32) -> Result<(), StoreError>;

    /// Opaque engine account blob (identity + unpublished one-time keys).
    fn account(&self) -> Result<Option<Vec<u8>>, StoreError>;
    fn set_account(&self, pickle: &[u8]) -> Result<(), StoreError>;

    /// Opaque per-peer session blob.
    fn session(&self, peer: &SessionAddress) -> Result<Option<Vec<u8>>, StoreError>;
    fn set_session(&self, peer: &SessionAddress, pickle: &[u8]) -> Result<(), StoreError>;

    /// Registration id advertised by a peer's bundle, cached at session
    /// bootstrap so later envelopes can be tagged without a re-fetch.
    fn peer_registration_id(&self, peer: &SessionAddress) -> Result<Option<u32>, StoreError>;
    fn set_peer_registration_id(&self, peer: &SessionAddress, id: u32) -> Result<(), StoreError>;

    /// Record an advertised one-time prekey id with its public key.
    fn insert_prekey(&self, id: u32, public_key: &[u8]) -> Result<(), StoreError>;
    fn contains_prekey(&self, id: u32) -> Result<bool, StoreError>;

    fn signed_prekey(&self) -> Result<Option<SignedPrekeyRecord>, StoreError>;
    fn set_signed_prekey(&self, record: &SignedPrekeyRecord) -> Result<(), StoreError>;
}
