// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Relay message envelopes shared by the websocket stream and the REST
//! surface. Binary content rides as base64 inside JSON.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Device id addressed when a sender does not name one.
pub const MASTER_DEVICE_ID: u32 = 1;

/// Wire type tag of an envelope's ciphertext. Only `Ciphertext` and
/// `PrekeyBundle` are decryptable; every other tag is ignored on receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Ciphertext,
    PrekeyBundle,
    Receipt,
    Unknown(i32),
}

impl WireType {
    pub fn code(self) -> i32 {
        match self {
            WireType::Ciphertext => 1,
            WireType::PrekeyBundle => 3,
            WireType::Receipt => 4,
            WireType::Unknown(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            1 => WireType::Ciphertext,
            3 => WireType::PrekeyBundle,
            4 => WireType::Receipt,
            other => WireType::Unknown(other),
        }
    }
}

/// One encrypted message in flight between two devices.
///
/// The same shape is used inbound (relay → pod, with `source` populated) and
/// outbound (pod → relay, destination fields populated).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default = "Uuid::nil")]
    pub guid: Uuid,

    #[serde(rename = "type")]
    pub wire_type: i32,

    #[serde(default)]
    pub source: String,

    #[serde(default, rename = "sourceDevice")]
    pub source_device: u32,

    #[serde(default, rename = "destinationDeviceId")]
    pub destination_device_id: u32,

    #[serde(default, rename = "destinationRegistrationId")]
    pub destination_registration_id: u32,

    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,

    #[serde(default, rename = "serverTimestamp")]
    pub server_timestamp: i64,
}

impl MessageEnvelope {
    pub fn wire_type(&self) -> WireType {
        WireType::from_code(self.wire_type)
    }
}

/// A pulled batch of envelopes; acknowledged as a unit by `batch_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBatch {
    pub batch_id: String,
    #[serde(default)]
    pub messages: Vec<MessageEnvelope>,
}

/// Serde adapter: `Vec<u8>` as standard base64, matching the relay's JSON
/// encoding of binary columns.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}
