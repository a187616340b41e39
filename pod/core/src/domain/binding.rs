// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Binding State Machine
//!
//! Pairing state kept per counterpart DID. Only two commands drive it:
//!
//! ```text
//! Unbound ──bind (owner only)──▶ PendingNonce { nonce }
//! PendingNonce ──bind_ack, signature valid──▶ Bound
//! PendingNonce ──bind_ack, signature invalid──▶ Unbound (nonce cleared)
//! ```
//!
//! The handshake is single-shot: one `bind_ack` attempt per issued nonce.
//! The nonce is cleared after the attempt whether or not verification
//! succeeded, so a stale nonce can never be replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pairing state for one counterpart DID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BindingState {
    /// No pairing attempt has been made, or the last one was abandoned.
    Unbound,
    /// A `bind` was issued and exactly one nonce is outstanding. A repeated
    /// `bind` overwrites the nonce; there is no multi-nonce tracking.
    PendingNonce {
        nonce: String,
        issued_at: DateTime<Utc>,
    },
    /// The handshake completed; the counterpart is paired.
    Bound,
}

impl BindingState {
    pub fn is_bound(&self) -> bool {
        matches!(self, BindingState::Bound)
    }

    pub fn pending_nonce(&self) -> Option<&str> {
        match self {
            BindingState::PendingNonce { nonce, .. } => Some(nonce),
            _ => None,
        }
    }
}

impl Default for BindingState {
    fn default() -> Self {
        BindingState::Unbound
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BindingError {
    /// The requesting DID is not the configured owner. Checked before any
    /// state is touched.
    #[error("illegal owner")]
    IllegalOwner,

    /// A binding command arrived after the handshake already completed.
    #[error("already bound")]
    AlreadyBound,

    /// `bind_ack` arrived with no outstanding nonce.
    #[error("no pending binding nonce")]
    NoPendingNonce,

    /// The acknowledgment signature did not verify over `nonce ++ timestamp`.
    #[error("invalid binding ack signature")]
    InvalidSignature,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_unbound() {
        assert_eq!(BindingState::default(), BindingState::Unbound);
        assert!(!BindingState::default().is_bound());
    }

    #[test]
    fn pending_nonce_is_observable() {
        let state = BindingState::PendingNonce {
            nonce: "ab12cd34".into(),
            issued_at: Utc::now(),
        };
        assert_eq!(state.pending_nonce(), Some("ab12cd34"));
        assert_eq!(BindingState::Bound.pending_nonce(), None);
    }

    #[test]
    fn state_round_trips_through_json() {
        let state = BindingState::PendingNonce {
            nonce: "1eba606e".into(),
            issued_at: Utc::now(),
        };
        let raw = serde_json::to_vec(&state).unwrap();
        assert_eq!(serde_json::from_slice::<BindingState>(&raw).unwrap(), state);
    }
}
