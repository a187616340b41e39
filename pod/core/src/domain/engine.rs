// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Encryption Engine Port
//!
//! The forward-secure session protocol is consumed as a black box: the core
//! only needs a session-existence check, encrypt, the two decrypt paths, and
//! key-material generation. Ratchet math, prekey agreement, and key
//! derivation all live behind this trait (see
//! [`crate::infrastructure::olm`] for the production adapter).
//!
//! ## Invariants
//!
//! - Session state is keyed by `(peer DID, device id)` and owned exclusively
//!   by the engine plus its [`crate::domain::store::KeyStore`].
//! - Key-generation methods persist new material durably **before**
//!   returning it; nothing unpersisted may ever be advertised to the relay.

use std::fmt;

use crate::domain::identity::Did;
use crate::domain::messaging::WireType;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no session for {0}")]
    NoSession(SessionAddress),

    #[error("ciphertext rejected: {0}")]
    BadCiphertext(String),

    #[error("invalid peer key material: {0}")]
    BadKeyMaterial(String),

    #[error("engine store failure: {0}")]
    Store(#[from] crate::domain::store::StoreError),
}

/// Address of one remote session: `(peer DID, device id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionAddress {
    pub did: Did,
    pub device_id: u32,
}

impl SessionAddress {
    pub fn new(did: Did, device_id: u32) -> Self {
        Self { did, device_id }
    }
}

impl fmt::Display for SessionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.did, self.device_id)
    }
}

/// Output of a single encryption: ciphertext plus the wire type the session
/// produced (prekey messages until the peer answers, ciphertext after).
#[derive(Debug, Clone)]
pub struct SealedMessage {
    pub wire_type: WireType,
    pub ciphertext: Vec<u8>,
}

pub trait EncryptionEngine: Send + Sync {
    /// Public identity key of the local account (no version-byte prefix).
    fn identity_key(&self) -> Result<Vec<u8>, EngineError>;

    fn has_session(&self, peer: &SessionAddress) -> Result<bool, EngineError>;

    /// Build and persist an outbound session from a peer's published keys.
    fn create_outbound_session(
        &self,
        peer: &SessionAddress,
        identity_key: &[u8],
        one_time_key: &[u8],
    ) -> Result<(), EngineError>;

    /// Encrypt one plaintext for an established session.
    fn encrypt(&self, peer: &SessionAddress, plaintext: &[u8]) -> Result<SealedMessage, EngineError>;

    /// Decrypt a `Ciphertext`-tagged envelope; requires an existing session.
    fn decrypt_ciphertext(
        &self,
        peer: &SessionAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EngineError>;

    /// Decrypt a `PrekeyBundle`-tagged envelope, creating the inbound
    /// session on first contact.
    fn decrypt_prekey(
        &self,
        peer: &SessionAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EngineError>;

    /// Generate `count` fresh one-time keys, persist them, and return the
    /// public halves for upload.
    fn generate_one_time_keys(&self, count: usize) -> Result<Vec<Vec<u8>>, EngineError>;

    /// Generate and persist the fallback key backing the signed prekey,
    /// returning its public half.
    fn generate_fallback_key(&self) -> Result<Vec<u8>, EngineError>;
}
