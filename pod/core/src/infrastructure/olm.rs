// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Olm Engine Adapter
//!
//! Production implementation of [`EncryptionEngine`] over `vodozemac`'s Olm
//! double ratchet. The adapter owns one account (identity key + unpublished
//! one-time keys + fallback key) and a cache of per-peer sessions; both are
//! pickled into the durable store after every state-advancing operation, so
//! a restart resumes exactly where the ratchet left off.
//!
//! Wire-type mapping: Olm prekey messages travel as `PrekeyBundle`
//! envelopes, normal ratchet messages as `Ciphertext`.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use vodozemac::olm::{Account, AccountPickle, OlmMessage, Session, SessionConfig, SessionPickle};
use vodozemac::Curve25519PublicKey;

use crate::domain::engine::{EncryptionEngine, EngineError, SealedMessage, SessionAddress};
use crate::domain::messaging::WireType;
use crate::domain::store::KeyStore;

/// Olm message-type constants as produced by `OlmMessage::to_parts`.
const MESSAGE_TYPE_PREKEY: usize = 0;
const MESSAGE_TYPE_NORMAL: usize = 1;

pub struct OlmEngine {
    store: Arc<dyn KeyStore>,
    account: Mutex<Account>,
    sessions: Mutex<HashMap<SessionAddress, Session>>,
}

impl OlmEngine {
    /// Load the account from the store, creating and persisting a fresh one
    /// on first run.
    pub fn new(store: Arc<dyn KeyStore>) -> Result<Self, EngineError> {
        let account = match store.account()? {
            Some(raw) => {
                let pickle: AccountPickle = serde_json::from_slice(&raw)
                    .map_err(|e| EngineError::BadKeyMaterial(format!("account pickle: {e}")))?;
                Account::from_pickle(pickle)
            }
            None => {
                let account = Account::new();
                persist_account(store.as_ref(), &account)?;
                account
            }
        };

        Ok(Self {
            store,
            account: Mutex::new(account),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Run `f` against the cached (or store-loaded) session for `peer`,
    /// persisting the advanced ratchet state on success.
    fn with_session<T>(
        &self,
        peer: &SessionAddress,
        f: impl FnOnce(&mut Session) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut sessions = self.sessions.lock();
        let session = match sessions.entry(peer.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let raw = self
                    .store
                    .session(peer)?
                    .ok_or_else(|| EngineError::NoSession(peer.clone()))?;
                let pickle: SessionPickle = serde_json::from_slice(&raw)
                    .map_err(|e| EngineError::BadKeyMaterial(format!("session pickle: {e}")))?;
                entry.insert(Session::from_pickle(pickle))
            }
        };

        let out = f(session)?;
        self.persist_session(peer, session)?;
        Ok(out)
    }

    fn persist_session(&self, peer: &SessionAddress, session: &Session) -> Result<(), EngineError> {
        let raw = serde_json::to_vec(&session.pickle())
            .map_err(|e| EngineError::BadKeyMaterial(format!("session pickle: {e}")))?;
        self.store.set_session(peer, &raw)?;
        Ok(())
    }
}

fn persist_account(store: &dyn KeyStore, account: &Account) -> Result<(), EngineError> {
    let raw = serde_json::to_vec(&account.pickle())
        .map_err(|e| EngineError::BadKeyMaterial(format!("account pickle: {e}")))?;
    store.set_account(&raw)?;
    Ok(())
}

fn parse_key(raw: &[u8], what: &str) -> Result<Curve25519PublicKey, EngineError> {
    Curve25519PublicKey::from_slice(raw)
        .map_err(|e| EngineError::BadKeyMaterial(format!("{what}: {e}")))
}

fn wire_type_of(message_type: usize) -> WireType {
    if message_type == MESSAGE_TYPE_PREKEY {
        WireType::PrekeyBundle
    } else {
        WireType::Ciphertext
    }
}

impl EncryptionEngine for OlmEngine {
    fn identity_key(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.account.lock().curve25519_key().to_bytes().to_vec())
    }

    fn has_session(&self, peer: &SessionAddress) -> Result<bool, EngineError> {
        if self.sessions.lock().contains_key(peer) {
            return Ok(true);
        }
        Ok(self.store.session(peer)?.is_some())
    }

    fn create_outbound_session(
        &self,
        peer: &SessionAddress,
        identity_key: &[u8],
        one_time_key: &[u8],
    ) -> Result<(), EngineError> {
        let identity_key = parse_key(identity_key, "peer identity key")?;
        let one_time_key = parse_key(one_time_key, "peer one-time key")?;

        let session = self.account.lock().create_outbound_session(
            SessionConfig::version_2(),
            identity_key,
            one_time_key,
        );

        self.persist_session(peer, &session)?;
        self.sessions.lock().insert(peer.clone(), session);
        Ok(())
    }

    fn encrypt(&self, peer: &SessionAddress, plaintext: &[u8]) -> Result<SealedMessage, EngineError> {
        self.with_session(peer, |session| {
            let (message_type, ciphertext) = session.encrypt(plaintext).to_parts();
            Ok(SealedMessage {
                wire_type: wire_type_of(message_type),
                ciphertext,
            })
        })
    }

    fn decrypt_ciphertext(
        &self,
        peer: &SessionAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        let message = OlmMessage::from_parts(MESSAGE_TYPE_NORMAL, ciphertext)
            .map_err(|e| EngineError::BadCiphertext(e.to_string()))?;

        self.with_session(peer, |session| {
            session
                .decrypt(&message)
                .map_err(|e| EngineError::BadCiphertext(e.to_string()))
        })
    }

    fn decrypt_prekey(
        &self,
        peer: &SessionAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        let message = OlmMessage::from_parts(MESSAGE_TYPE_PREKEY, ciphertext)
            .map_err(|e| EngineError::BadCiphertext(e.to_string()))?;
        let OlmMessage::PreKey(ref prekey) = message else {
            return Err(EngineError::BadCiphertext("not a prekey message".into()));
        };

        // A peer may keep sending prekey messages until it sees our first
        // answer; those decrypt on the session that already exists.
        if self.has_session(peer)? {
            if let Ok(plaintext) = self.with_session(peer, |session| {
                session
                    .decrypt(&message)
                    .map_err(|e| EngineError::BadCiphertext(e.to_string()))
            }) {
                return Ok(plaintext);
            }
        }

        let result = {
            let mut account = self.account.lock();
            let result = account
                .create_inbound_session(prekey.identity_key(), prekey)
                .map_err(|e| EngineError::BadCiphertext(e.to_string()))?;
            // The consumed one-time key is gone from the account; that must
            // hit disk before the plaintext is released.
            persist_account(self.store.as_ref(), &account)?;
            result
        };

        self.persist_session(peer, &result.session)?;
        self.sessions.lock().insert(peer.clone(), result.session);
        Ok(result.plaintext)
    }

    fn generate_one_time_keys(&self, count: usize) -> Result<Vec<Vec<u8>>, EngineError> {
        let mut account = self.account.lock();
        let _ = account.generate_one_time_keys(count);

        // Only keys the account actually retained are advertised.
        let keys: Vec<Vec<u8>> = account
            .one_time_keys()
            .values()
            .map(|key| key.to_bytes().to_vec())
            .collect();
        account.mark_keys_as_published();

        persist_account(self.store.as_ref(), &account)?;
        Ok(keys)
    }

    fn generate_fallback_key(&self) -> Result<Vec<u8>, EngineError> {
        let mut account = self.account.lock();
        let _ = account.generate_fallback_key();

        let key = account
            .fallback_key()
            .into_values()
            .next()
            .ok_or_else(|| EngineError::BadKeyMaterial("fallback key missing".into()))?;

        persist_account(self.store.as_ref(), &account)?;
        Ok(key.to_bytes().to_vec())
    }
}
