// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Binding Handshake
//!
//! Drives the pairing state machine in [`crate::domain::binding`] against
//! the durable store. The handshake has two legs:
//!
//! 1. `bind`: the owner asks the pod to identify itself. The pod answers
//!    with a fresh nonce and its signature over `nonce ++ timestamp`, and
//!    parks the nonce in `PendingNonce`.
//! 2. `bind_ack`: the owner proves control of its own key by signing
//!    `nonce ++ timestamp` back. One attempt per nonce: the nonce is cleared
//!    whether or not the signature verifies.
//!
//! Every leg rejects callers other than the single configured owner before
//! any state is read or written.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::binding::{BindingError, BindingState};
use crate::domain::identity::{verify_signature, Did, PodIdentity};
use crate::domain::store::{PodStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The pod's answer to a `bind` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindReceipt {
    pub identity: Did,
    pub nonce: String,
    pub timestamp: String,
    pub signature: String,
}

/// Arguments of the `bind_ack` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindAckParams {
    pub timestamp: String,
    pub signature: String,
}

pub struct BindingHandshake {
    identity: Arc<PodIdentity>,
    owner: Did,
    store: Arc<dyn PodStore>,
}

impl BindingHandshake {
    pub fn new(identity: Arc<PodIdentity>, owner: Did, store: Arc<dyn PodStore>) -> Self {
        Self {
            identity,
            owner,
            store,
        }
    }

    /// Open a handshake round for `caller`.
    ///
    /// A repeated `bind` before acknowledgment overwrites the outstanding
    /// nonce; a `bind` after the handshake completed is rejected.
    pub fn bind(&self, caller: &Did) -> Result<BindReceipt, HandshakeError> {
        if *caller != self.owner {
            return Err(BindingError::IllegalOwner.into());
        }
        if self.store.binding_state(caller)?.is_bound() {
            return Err(BindingError::AlreadyBound.into());
        }

        let nonce = hex::encode(rand::random::<[u8; 4]>());
        let now = Utc::now();
        let timestamp = now.timestamp_millis().to_string();
        let signature = self.identity.sign(&format!("{nonce}{timestamp}"));

        self.store.put_binding_state(
            caller,
            &BindingState::PendingNonce {
                nonce: nonce.clone(),
                issued_at: now,
            },
        )?;

        Ok(BindReceipt {
            identity: self.identity.did().clone(),
            nonce,
            timestamp,
            signature,
        })
    }

    /// Close the handshake round for `caller`.
    ///
    /// The stored nonce is consumed by this attempt: on success the state
    /// becomes `Bound`, on failure it falls back to `Unbound` and a fresh
    /// `bind` is required.
    pub fn acknowledge(&self, caller: &Did, params: &BindAckParams) -> Result<(), HandshakeError> {
        if *caller != self.owner {
            return Err(BindingError::IllegalOwner.into());
        }

        let nonce = match self.store.binding_state(caller)? {
            BindingState::PendingNonce { nonce, .. } => nonce,
            BindingState::Bound => return Err(BindingError::AlreadyBound.into()),
            BindingState::Unbound => return Err(BindingError::NoPendingNonce.into()),
        };

        let message = format!("{}{}", nonce, params.timestamp);
        if !verify_signature(caller, &message, &params.signature) {
            warn!(did = %caller, "binding ack signature rejected");
            self.store.put_binding_state(caller, &BindingState::Unbound)?;
            return Err(BindingError::InvalidSignature.into());
        }

        self.store.put_binding_state(caller, &BindingState::Bound)?;
        info!(did = %caller, "binding completed");
        Ok(())
    }
}
