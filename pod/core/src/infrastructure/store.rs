// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sled-backed durable store.
//!
//! One embedded database, partitioned into named trees:
//!
//! - `bindings`: DID → binding state (JSON)
//! - `members`:  DID → access mode (8-byte big-endian)
//! - `keys`:     registration id, engine account blob, prekey ids, the
//!                signed prekey record
//! - `sessions`: `(DID, device)` → pickled session blob + cached peer
//!                registration id

use std::path::Path;

use crate::domain::access::AccessMode;
use crate::domain::binding::BindingState;
use crate::domain::engine::SessionAddress;
use crate::domain::identity::Did;
use crate::domain::store::{KeyStore, PodStore, SignedPrekeyRecord, StoreError};

const TREE_BINDINGS: &str = "bindings";
const TREE_MEMBERS: &str = "members";
const TREE_KEYS: &str = "keys";
const TREE_SESSIONS: &str = "sessions";

const KEY_REGISTRATION_ID: &[u8] = b"registration_id";
const KEY_ACCOUNT: &[u8] = b"account";
const KEY_SIGNED_PREKEY: &[u8] = b"signed_prekey";
const PREKEY_PREFIX: &str = "prekey/";

pub struct SledStore {
    bindings: sled::Tree,
    members: sled::Tree,
    keys: sled::Tree,
    sessions: sled::Tree,
}

impl SledStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            bindings: db.open_tree(TREE_BINDINGS)?,
            members: db.open_tree(TREE_MEMBERS)?,
            keys: db.open_tree(TREE_KEYS)?,
            sessions: db.open_tree(TREE_SESSIONS)?,
        })
    }

    fn session_key(peer: &SessionAddress) -> Vec<u8> {
        format!("{}/{}", peer.did, peer.device_id).into_bytes()
    }

    fn peer_registration_key(peer: &SessionAddress) -> Vec<u8> {
        format!("{}/{}/registration", peer.did, peer.device_id).into_bytes()
    }
}

impl PodStore for SledStore {
    fn binding_state(&self, did: &Did) -> Result<BindingState, StoreError> {
        match self.bindings.get(did.as_str())? {
            None => Ok(BindingState::Unbound),
            Some(raw) => serde_json::from_slice(&raw)
                .map_err(|_| StoreError::Corrupt(format!("bindings/{did}"))),
        }
    }

    fn put_binding_state(&self, did: &Did, state: &BindingState) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(state)
            .map_err(|_| StoreError::Corrupt(format!("bindings/{did}")))?;
        self.bindings.insert(did.as_str(), raw)?;
        self.bindings.flush().map_err(StoreError::from)?;
        Ok(())
    }

    fn member_access_mode(&self, did: &Did) -> Result<AccessMode, StoreError> {
        match self.members.get(did.as_str())? {
            None => Ok(AccessMode::NotApplicant),
            Some(raw) => {
                let Ok(code) = <[u8; 8]>::try_from(raw.as_ref()) else {
                    // Truncated record; deny rather than fail.
                    return Ok(AccessMode::NotApplicant);
                };
                Ok(AccessMode::from_code(u64::from_be_bytes(code)))
            }
        }
    }

    fn update_member_access_mode(&self, did: &Did, mode: AccessMode) -> Result<(), StoreError> {
        self.members
            .insert(did.as_str(), mode.code().to_be_bytes().to_vec())?;
        self.members.flush().map_err(StoreError::from)?;
        Ok(())
    }

    fn remove_member(&self, did: &Did) -> Result<(), StoreError> {
        self.members.remove(did.as_str())?;
        self.members.flush().map_err(StoreError::from)?;
        Ok(())
    }
}

impl KeyStore for SledStore {
    fn registration_id(&self) -> Result<Option<u32>, StoreError> {
        match self.keys.get(KEY_REGISTRATION_ID)? {
            None => Ok(None),
            Some(raw) => {
                let code = <[u8; 4]>::try_from(raw.as_ref())
                    .map_err(|_| StoreError::Corrupt("keys/registration_id".into()))?;
                Ok(Some(u32::from_be_bytes(code)))
            }
        }
    }

    fn set_registration_id(&self, id: u32) -> Result<(), StoreError> {
        self.keys
            .insert(KEY_REGISTRATION_ID, id.to_be_bytes().to_vec())?;
        self.keys.flush().map_err(StoreError::from)?;
        Ok(())
    }

    fn account(&self) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.keys.get(KEY_ACCOUNT)?.map(|raw| raw.to_vec()))
    }

    fn set_account(&self, pickle: &[u8]) -> Result<(), StoreError> {
        self.keys.insert(KEY_ACCOUNT, pickle)?;
        self.keys.flush().map_err(StoreError::from)?;
        Ok(())
    }

    fn session(&self, peer: &SessionAddress) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .sessions
            .get(Self::session_key(peer))?
            .map(|raw| raw.to_vec()))
    }

    fn set_session(&self, peer: &SessionAddress, pickle: &[u8]) -> Result<(), StoreError> {
        self.sessions.insert(Self::session_key(peer), pickle)?;
        self.sessions.flush().map_err(StoreError::from)?;
        Ok(())
    }

    fn peer_registration_id(&self, peer: &SessionAddress) -> Result<Option<u32>, StoreError> {
        match self.sessions.get(Self::peer_registration_key(peer))? {
            None => Ok(None),
            Some(raw) => {
                let code = <[u8; 4]>::try_from(raw.as_ref())
                    .map_err(|_| StoreError::Corrupt(format!("sessions/{peer}/registration")))?;
                Ok(Some(u32::from_be_bytes(code)))
            }
        }
    }

    fn set_peer_registration_id(&self, peer: &SessionAddress, id: u32) -> Result<(), StoreError> {
        self.sessions
            .insert(Self::peer_registration_key(peer), id.to_be_bytes().to_vec())?;
        self.sessions.flush().map_err(StoreError::from)?;
        Ok(())
    }

    fn insert_prekey(&self, id: u32, public_key: &[u8]) -> Result<(), StoreError> {
        let key = format!("{PREKEY_PREFIX}{id:08x}");
        self.keys.insert(key.as_bytes(), public_key)?;
        self.keys.flush().map_err(StoreError::from)?;
        Ok(())
    }

    fn contains_prekey(&self, id: u32) -> Result<bool, StoreError> {
        let key = format!("{PREKEY_PREFIX}{id:08x}");
        Ok(self.keys.contains_key(key.as_bytes())?)
    }

    fn signed_prekey(&self) -> Result<Option<SignedPrekeyRecord>, StoreError> {
        match self.keys.get(KEY_SIGNED_PREKEY)? {
            None => Ok(None),
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|_| StoreError::Corrupt("keys/signed_prekey".into())),
        }
    }

    fn set_signed_prekey(&self, record: &SignedPrekeyRecord) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(record)
            .map_err(|_| StoreError::Corrupt("keys/signed_prekey".into()))?;
        self.keys.insert(KEY_SIGNED_PREKEY, raw)?;
        self.keys.flush().map_err(StoreError::from)?;
        Ok(())
    }
}
