// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application-level command envelopes carried inside encrypted messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decrypted request from a counterpart device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Value,
}

/// Acknowledgment of a transport-level command frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStatus {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub ok: i32,
    #[serde(default, rename = "errors")]
    pub error: String,
}

impl CommandStatus {
    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }
}

/// Response envelope: exactly one of `data` / `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandReply {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReply {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: None,
            error: Some(error.into()),
        }
    }

    /// Serialize into a response frame. Serialization of a reply cannot fail
    /// for the types involved; an empty frame would only hide a programming
    /// error, so this is infallible by construction.
    pub fn into_frame(self) -> Vec<u8> {
        serde_json::to_vec(&self).unwrap_or_else(|_| b"{}".to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_carries_exactly_one_field() {
        let ok = serde_json::to_value(CommandReply::ok("1", json!({"status": "ok"}))).unwrap();
        assert!(ok.get("data").is_some());
        assert!(ok.get("error").is_none());

        let fail = serde_json::to_value(CommandReply::fail("1", "nope")).unwrap();
        assert!(fail.get("data").is_none());
        assert_eq!(fail["error"], "nope");
    }

    #[test]
    fn request_tolerates_missing_fields() {
        let req: CommandRequest = serde_json::from_str("{}").unwrap();
        assert!(req.id.is_empty());
        assert!(req.command.is_empty());
        assert!(req.args.is_null());
    }
}
