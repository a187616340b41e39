// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Directory/relay port: account registration, key publication, peer bundle
//! lookup, and the envelope push/pull surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::identity::Did;
use crate::domain::messaging::{base64_bytes, MessageEnvelope};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Transport(String),

    #[error("directory returned {status} while {context}")]
    UnexpectedStatus { status: u16, context: &'static str },

    #[error("directory response malformed: {0}")]
    Decode(String),
}

/// A published one-time prekey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrekeyEntry {
    #[serde(rename = "keyId")]
    pub id: u32,
    #[serde(rename = "publicKey", with = "base64_bytes")]
    pub public_key: Vec<u8>,
}

/// The published signed prekey with its identity signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPrekeyEntry {
    #[serde(rename = "keyId")]
    pub id: u32,
    #[serde(rename = "publicKey", with = "base64_bytes")]
    pub public_key: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// Key material of one of a peer's devices, as served by the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceKeys {
    #[serde(rename = "deviceId")]
    pub device_id: u32,
    #[serde(rename = "registrationId")]
    pub registration_id: u32,
    #[serde(rename = "signedPreKey")]
    pub signed_prekey: SignedPrekeyEntry,
    #[serde(rename = "preKey")]
    pub prekey: PrekeyEntry,
}

/// A peer's full published bundle: identity key plus per-device keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerKeyBundle {
    #[serde(rename = "identityKey", with = "base64_bytes")]
    pub identity_key: Vec<u8>,
    #[serde(default)]
    pub devices: Vec<DeviceKeys>,
}

/// One replenishment round, assembled by the provisioner and handed to the
/// directory for upload. Everything in here is already persisted.
#[derive(Debug, Clone)]
pub struct KeyUpload {
    pub identity_key: Vec<u8>,
    pub prekeys: Vec<PrekeyEntry>,
    pub signed_prekey: SignedPrekeyEntry,
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn register_account(&self, registration_id: u32) -> Result<(), DirectoryError>;

    async fn upload_keys(&self, upload: &KeyUpload) -> Result<(), DirectoryError>;

    /// Count of our one-time prekeys still held by the directory.
    async fn available_prekey_count(&self) -> Result<usize, DirectoryError>;

    async fn peer_bundle(&self, did: &Did, device_id: u32)
        -> Result<PeerKeyBundle, DirectoryError>;

    async fn push_messages(
        &self,
        destination: &Did,
        messages: &[MessageEnvelope],
        timestamp: i64,
    ) -> Result<(), DirectoryError>;

    /// Pull queued envelopes; the boolean reports whether more are waiting.
    async fn pull_messages(&self) -> Result<(Vec<MessageEnvelope>, bool), DirectoryError>;

    async fn delete_message(&self, guid: Uuid) -> Result<(), DirectoryError>;
}
