// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Session Courier
//!
//! Lazily bootstraps sending sessions, encrypts outbound payload batches,
//! and decrypts the inbound stream pulled off the multiplexer.
//!
//! Inbound envelopes are dispatched strictly by wire type; anything that is
//! not decryptable (unknown type, missing session, corrupt ciphertext) is
//! dropped and still acknowledged for deletion. The policy trades message
//! loss for a stream that can never be blocked by a poison message.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::directory::{DirectoryClient, DirectoryError};
use crate::domain::engine::{EncryptionEngine, EngineError, SessionAddress};
use crate::domain::identity::Did;
use crate::domain::messaging::{MessageBatch, MessageEnvelope, WireType};
use crate::domain::store::{KeyStore, StoreError};
use crate::infrastructure::transport::ChannelMux;

#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    /// The peer has not finished registering any device with the directory.
    #[error("peer registration not completed")]
    PeerNotProvisioned,

    /// The requested device id is absent from the peer's bundle.
    #[error("peer device {0} not found")]
    DeviceNotFound(u32),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A decrypted application message ready for the router.
#[derive(Debug, Clone)]
pub struct DecryptedMessage {
    pub source: Did,
    pub source_device: u32,
    pub content: Vec<u8>,
}

pub struct SessionCourier {
    engine: Arc<dyn EncryptionEngine>,
    directory: Arc<dyn DirectoryClient>,
    keys: Arc<dyn KeyStore>,
}

/// Published public keys carry a leading version byte on the wire; the
/// engine wants the bare 32-byte key.
fn strip_key_version(key: &[u8]) -> &[u8] {
    match key {
        [0x05, rest @ ..] if rest.len() == 32 => rest,
        other => other,
    }
}

impl SessionCourier {
    pub fn new(
        engine: Arc<dyn EncryptionEngine>,
        directory: Arc<dyn DirectoryClient>,
        keys: Arc<dyn KeyStore>,
    ) -> Self {
        Self {
            engine,
            directory,
            keys,
        }
    }

    /// Make sure a sending session exists for `peer`, fetching its bundle
    /// and building one if not.
    pub async fn ensure_sender_session(&self, peer: &SessionAddress) -> Result<(), CourierError> {
        if self.engine.has_session(peer)? {
            return Ok(());
        }

        let bundle = self.directory.peer_bundle(&peer.did, peer.device_id).await?;
        if bundle.devices.is_empty() {
            return Err(CourierError::PeerNotProvisioned);
        }

        let device = bundle
            .devices
            .iter()
            .find(|d| d.device_id == peer.device_id)
            .ok_or(CourierError::DeviceNotFound(peer.device_id))?;

        // One-time prekeys are consumed on use; once the peer's pool runs
        // dry the directory serves the signed prekey as the fallback.
        let one_time_key = if device.prekey.public_key.is_empty() {
            strip_key_version(&device.signed_prekey.public_key)
        } else {
            strip_key_version(&device.prekey.public_key)
        };

        self.engine.create_outbound_session(
            peer,
            strip_key_version(&bundle.identity_key),
            one_time_key,
        )?;
        self.keys
            .set_peer_registration_id(peer, device.registration_id)?;

        debug!(peer = %peer, "sender session established");
        Ok(())
    }

    /// Encrypt `plaintexts` for `peer`, in order, bootstrapping the session
    /// if absent. Each envelope is tagged with the wire type its encryption
    /// produced.
    pub async fn encrypt_batch(
        &self,
        peer: &SessionAddress,
        plaintexts: &[Vec<u8>],
    ) -> Result<Vec<MessageEnvelope>, CourierError> {
        self.ensure_sender_session(peer).await?;

        let registration_id = self.keys.peer_registration_id(peer)?.unwrap_or_default();

        let mut envelopes = Vec::with_capacity(plaintexts.len());
        for plaintext in plaintexts {
            let sealed = self.engine.encrypt(peer, plaintext)?;
            envelopes.push(MessageEnvelope {
                guid: uuid::Uuid::nil(),
                wire_type: sealed.wire_type.code(),
                source: String::new(),
                source_device: 0,
                destination_device_id: peer.device_id,
                destination_registration_id: registration_id,
                content: sealed.ciphertext,
                server_timestamp: 0,
            });
        }
        Ok(envelopes)
    }

    /// Decrypt one inbound envelope. `None` means the envelope is to be
    /// dropped; it still counts as consumed.
    pub fn decrypt_inbound(&self, envelope: &MessageEnvelope) -> Option<Vec<u8>> {
        let peer = SessionAddress::new(Did::new(&envelope.source), envelope.source_device);

        let outcome = match envelope.wire_type() {
            WireType::Ciphertext => self.engine.decrypt_ciphertext(&peer, &envelope.content),
            WireType::PrekeyBundle => self.engine.decrypt_prekey(&peer, &envelope.content),
            other => {
                debug!(guid = %envelope.guid, wire_type = other.code(), "unsupported message type");
                return None;
            }
        };

        match outcome {
            Ok(plaintext) => Some(plaintext),
            Err(err) => {
                debug!(guid = %envelope.guid, peer = %peer, error = %err, "dropping undecryptable message");
                None
            }
        }
    }
}

/// Decrypt stage of the inbound pipeline.
///
/// Pulls raw `message` frames off the multiplexer, unwraps each batch,
/// publishes decrypted items in batch order, and acknowledges the batch with
/// a `delete_messages` command issued through the multiplexer itself. The
/// acknowledgment uses its own correlation id, so it cannot deadlock against
/// any in-flight command.
pub async fn run_inbound_pump(
    courier: Arc<SessionCourier>,
    mux: ChannelMux,
    mut raw: mpsc::Receiver<serde_json::Value>,
    out: mpsc::Sender<DecryptedMessage>,
) {
    while let Some(frame) = raw.recv().await {
        let batch: MessageBatch = match serde_json::from_value(frame) {
            Ok(batch) => batch,
            Err(err) => {
                warn!(error = %err, "cannot decode batch message");
                continue;
            }
        };

        for envelope in &batch.messages {
            let Some(content) = courier.decrypt_inbound(envelope) else {
                continue;
            };

            let message = DecryptedMessage {
                source: Did::new(&envelope.source),
                source_device: envelope.source_device,
                content,
            };
            if out.send(message).await.is_err() {
                debug!("decrypted message consumer gone; stopping pump");
                return;
            }
        }

        match mux.send("delete_messages", json!([&batch.batch_id])).await {
            Ok(status) => {
                debug!(batch_id = %batch.batch_id, ok = status.ok, "processed batch acknowledged")
            }
            Err(err) => warn!(batch_id = %batch.batch_id, error = %err, "batch acknowledgment failed"),
        }
    }
    debug!("raw message channel closed; pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::directory::{DeviceKeys, KeyUpload, PeerKeyBundle, PrekeyEntry, SignedPrekeyEntry};
    use crate::domain::engine::SealedMessage;
    use crate::infrastructure::store::SledStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Reversible "encryption" double: prekey wire type for the first
    /// message of a session, ciphertext after.
    struct EchoEngine {
        sessions: Mutex<HashSet<String>>,
    }

    impl EchoEngine {
        fn new() -> Self {
            Self {
                sessions: Mutex::new(HashSet::new()),
            }
        }
    }

    impl EncryptionEngine for EchoEngine {
        fn identity_key(&self) -> Result<Vec<u8>, EngineError> {
            Ok(vec![1; 32])
        }

        fn has_session(&self, peer: &SessionAddress) -> Result<bool, EngineError> {
            Ok(self.sessions.lock().contains(&peer.to_string()))
        }

        fn create_outbound_session(
            &self,
            peer: &SessionAddress,
            identity_key: &[u8],
            one_time_key: &[u8],
        ) -> Result<(), EngineError> {
            assert_eq!(identity_key.len(), 32, "version byte not stripped");
            assert_eq!(one_time_key.len(), 32, "version byte not stripped");
            self.sessions.lock().insert(peer.to_string());
            Ok(())
        }

        fn encrypt(
            &self,
            peer: &SessionAddress,
            plaintext: &[u8],
        ) -> Result<SealedMessage, EngineError> {
            if !self.sessions.lock().contains(&peer.to_string()) {
                return Err(EngineError::NoSession(peer.clone()));
            }
            Ok(SealedMessage {
                wire_type: WireType::Ciphertext,
                ciphertext: plaintext.iter().rev().copied().collect(),
            })
        }

        fn decrypt_ciphertext(
            &self,
            peer: &SessionAddress,
            ciphertext: &[u8],
        ) -> Result<Vec<u8>, EngineError> {
            if !self.sessions.lock().contains(&peer.to_string()) {
                return Err(EngineError::NoSession(peer.clone()));
            }
            Ok(ciphertext.iter().rev().copied().collect())
        }

        fn decrypt_prekey(
            &self,
            peer: &SessionAddress,
            ciphertext: &[u8],
        ) -> Result<Vec<u8>, EngineError> {
            self.sessions.lock().insert(peer.to_string());
            Ok(ciphertext.iter().rev().copied().collect())
        }

        fn generate_one_time_keys(&self, count: usize) -> Result<Vec<Vec<u8>>, EngineError> {
            Ok(vec![vec![2; 32]; count])
        }

        fn generate_fallback_key(&self) -> Result<Vec<u8>, EngineError> {
            Ok(vec![3; 32])
        }
    }

    struct ScriptedDirectory {
        bundle: Option<PeerKeyBundle>,
    }

    #[async_trait]
    impl DirectoryClient for ScriptedDirectory {
        async fn register_account(&self, _registration_id: u32) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn upload_keys(&self, _upload: &KeyUpload) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn available_prekey_count(&self) -> Result<usize, DirectoryError> {
            Ok(0)
        }

        async fn peer_bundle(
            &self,
            _did: &Did,
            _device_id: u32,
        ) -> Result<PeerKeyBundle, DirectoryError> {
            self.bundle
                .clone()
                .ok_or(DirectoryError::UnexpectedStatus {
                    status: 404,
                    context: "fetching peer bundle",
                })
        }

        async fn push_messages(
            &self,
            _destination: &Did,
            _messages: &[MessageEnvelope],
            _timestamp: i64,
        ) -> Result<(), DirectoryError> {
            Ok(())
        }

        async fn pull_messages(&self) -> Result<(Vec<MessageEnvelope>, bool), DirectoryError> {
            Ok((Vec::new(), false))
        }

        async fn delete_message(&self, _guid: uuid::Uuid) -> Result<(), DirectoryError> {
            Ok(())
        }
    }

    fn versioned(key: [u8; 32]) -> Vec<u8> {
        let mut out = vec![0x05];
        out.extend_from_slice(&key);
        out
    }

    fn bundle_with_device(device_id: u32) -> PeerKeyBundle {
        PeerKeyBundle {
            identity_key: versioned([7; 32]),
            devices: vec![DeviceKeys {
                device_id,
                registration_id: 7421,
                signed_prekey: SignedPrekeyEntry {
                    id: 9,
                    public_key: versioned([8; 32]),
                    signature: vec![0; 64],
                },
                prekey: PrekeyEntry {
                    id: 4,
                    public_key: versioned([9; 32]),
                },
            }],
        }
    }

    struct Fixture {
        courier: SessionCourier,
        keys: Arc<SledStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(bundle: Option<PeerKeyBundle>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(&dir.path().join("pod.db")).unwrap());
        let courier = SessionCourier::new(
            Arc::new(EchoEngine::new()),
            Arc::new(ScriptedDirectory { bundle }),
            store.clone(),
        );
        Fixture {
            courier,
            keys: store,
            _dir: dir,
        }
    }

    fn peer() -> SessionAddress {
        SessionAddress::new(Did::new("did:key:zPeer"), 1)
    }

    #[tokio::test]
    async fn unprovisioned_peer_is_rejected() {
        let fx = fixture(Some(PeerKeyBundle {
            identity_key: versioned([7; 32]),
            devices: Vec::new(),
        }));

        let err = fx.courier.ensure_sender_session(&peer()).await.unwrap_err();
        assert!(matches!(err, CourierError::PeerNotProvisioned));
    }

    #[tokio::test]
    async fn missing_device_is_rejected() {
        let fx = fixture(Some(bundle_with_device(2)));

        let err = fx.courier.ensure_sender_session(&peer()).await.unwrap_err();
        assert!(matches!(err, CourierError::DeviceNotFound(1)));
    }

    #[tokio::test]
    async fn session_bootstrap_caches_peer_registration_id() {
        let fx = fixture(Some(bundle_with_device(1)));

        fx.courier.ensure_sender_session(&peer()).await.unwrap();
        assert_eq!(fx.keys.peer_registration_id(&peer()).unwrap(), Some(7421));

        // Second call hits the existing session; no bundle fetch occurs
        // even though the scripted directory would now 404.
        fx.courier.ensure_sender_session(&peer()).await.unwrap();
    }

    #[tokio::test]
    async fn encrypt_batch_preserves_order_and_tags() {
        let fx = fixture(Some(bundle_with_device(1)));

        let envelopes = fx
            .courier
            .encrypt_batch(&peer(), &[b"one".to_vec(), b"two".to_vec()])
            .await
            .unwrap();

        assert_eq!(envelopes.len(), 2);
        assert_eq!(envelopes[0].content, b"eno".to_vec());
        assert_eq!(envelopes[1].content, b"owt".to_vec());
        for envelope in &envelopes {
            assert_eq!(envelope.wire_type(), WireType::Ciphertext);
            assert_eq!(envelope.destination_device_id, 1);
            assert_eq!(envelope.destination_registration_id, 7421);
        }
    }

    #[tokio::test]
    async fn decrypt_dispatches_by_wire_type() {
        let fx = fixture(Some(bundle_with_device(1)));

        let envelope = MessageEnvelope {
            guid: uuid::Uuid::new_v4(),
            wire_type: WireType::PrekeyBundle.code(),
            source: "did:key:zPeer".into(),
            source_device: 1,
            destination_device_id: 0,
            destination_registration_id: 0,
            content: b"tpyrc".to_vec(),
            server_timestamp: 0,
        };
        assert_eq!(fx.courier.decrypt_inbound(&envelope), Some(b"crypt".to_vec()));

        // A receipt is not decryptable and is silently dropped.
        let receipt = MessageEnvelope {
            wire_type: WireType::Receipt.code(),
            ..envelope.clone()
        };
        assert_eq!(fx.courier.decrypt_inbound(&receipt), None);
    }

    #[tokio::test]
    async fn decrypt_failure_is_dropped_not_fatal() {
        let fx = fixture(None);

        // Ciphertext with no session behind it.
        let envelope = MessageEnvelope {
            guid: uuid::Uuid::new_v4(),
            wire_type: WireType::Ciphertext.code(),
            source: "did:key:zStranger".into(),
            source_device: 1,
            destination_device_id: 0,
            destination_registration_id: 0,
            content: b"garbage".to_vec(),
            server_timestamp: 0,
        };
        assert_eq!(fx.courier.decrypt_inbound(&envelope), None);
    }
}
