// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Key Provisioner
//!
//! Keeps the relay stocked with key material: a persisted registration id,
//! a pool of one-time prekeys, and one rotating signed prekey whose public
//! half carries the pod identity's Ed25519 signature.
//!
//! ## Invariants
//!
//! - Every key is persisted durably before it is returned for upload; a
//!   crash can never leave the relay advertising a key the pod lost.
//! - Replenishment is demand-driven: nothing is generated while the remote
//!   inventory is at or above [`PREKEY_MINIMUM_INVENTORY`].
//! - Key ids are assigned monotonically from a random 24-bit starting point.
//!   Uniqueness across restarts is probabilistic, not guaranteed.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::domain::directory::{KeyUpload, PrekeyEntry, SignedPrekeyEntry};
use crate::domain::engine::{EncryptionEngine, EngineError};
use crate::domain::identity::PodIdentity;
use crate::domain::store::{KeyStore, SignedPrekeyRecord, StoreError};

/// Remote inventory level below which a refill is triggered.
pub const PREKEY_MINIMUM_INVENTORY: usize = 35;

/// Number of one-time prekeys generated per refill.
pub const PREKEY_BATCH_SIZE: usize = 100;

const KEY_ID_MASK: u32 = 0x00ff_ffff;
const REGISTRATION_ID_MASK: u32 = 0x3fff;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub struct KeyProvisioner {
    identity: Arc<PodIdentity>,
    engine: Arc<dyn EncryptionEngine>,
    keys: Arc<dyn KeyStore>,
}

impl KeyProvisioner {
    pub fn new(
        identity: Arc<PodIdentity>,
        engine: Arc<dyn EncryptionEngine>,
        keys: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            identity,
            engine,
            keys,
        }
    }

    /// Load the registration id, generating and persisting a fresh 14-bit
    /// one on first run. Idempotent.
    pub fn ensure_registration_id(&self) -> Result<u32, ProvisionError> {
        if let Some(id) = self.keys.registration_id()? {
            return Ok(id);
        }

        let id = rand::random::<u32>() & REGISTRATION_ID_MASK;
        self.keys.set_registration_id(id)?;
        Ok(id)
    }

    /// Top the relay back up when its inventory of our one-time prekeys
    /// drops below the minimum. Returns `None` when no upload is needed.
    ///
    /// On failure to persist, the whole refill is abandoned and nothing must
    /// be uploaded by the caller.
    pub fn replenish(&self, remote_inventory: usize) -> Result<Option<KeyUpload>, ProvisionError> {
        if remote_inventory >= PREKEY_MINIMUM_INVENTORY {
            debug!(remote_inventory, "prekey inventory sufficient");
            return Ok(None);
        }

        let mut next_id = rand::random::<u32>() & KEY_ID_MASK;

        let mut prekeys = Vec::with_capacity(PREKEY_BATCH_SIZE);
        for public_key in self.engine.generate_one_time_keys(PREKEY_BATCH_SIZE)? {
            let id = next_id;
            next_id = next_id.wrapping_add(1) & KEY_ID_MASK;

            self.keys.insert_prekey(id, &public_key)?;
            prekeys.push(PrekeyEntry { id, public_key });
        }

        let public_key = self.engine.generate_fallback_key()?;
        let signature = self.identity.sign_bytes(&public_key);
        let record = SignedPrekeyRecord {
            id: next_id,
            public_key: public_key.clone(),
            signature: signature.clone(),
            rotated_at: Utc::now(),
        };
        self.keys.set_signed_prekey(&record)?;

        debug!(
            batch = prekeys.len(),
            signed_prekey = record.id,
            "prekey batch persisted for upload"
        );

        Ok(Some(KeyUpload {
            identity_key: self.engine.identity_key()?,
            prekeys,
            signed_prekey: SignedPrekeyEntry {
                id: record.id,
                public_key,
                signature,
            },
        }))
    }
}
