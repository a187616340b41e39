// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! REST adapter for the directory/relay service.
//!
//! Account registration, key publication, peer bundle lookup, and the
//! envelope push/pull/delete surface, authenticated with a bearer token
//! obtained from `POST /api/auth` (a signature over `timestamp ++ role`
//! with the pod's identity key).

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::domain::directory::{DirectoryClient, DirectoryError, KeyUpload, PeerKeyBundle};
use crate::domain::identity::{Did, PodIdentity};
use crate::domain::messaging::MessageEnvelope;

/// Role claimed when authenticating against the relay.
const AUTH_ROLE: &str = "pod-node";

/// Version byte prefixed to every public key on the REST surface.
const PUBLIC_KEY_VERSION: u8 = 0x05;

pub struct RelayClient {
    http: reqwest::Client,
    endpoint: String,
    token: RwLock<String>,
}

fn versioned(key: &[u8]) -> String {
    let mut raw = Vec::with_capacity(key.len() + 1);
    raw.push(PUBLIC_KEY_VERSION);
    raw.extend_from_slice(key);
    BASE64.encode(raw)
}

impl RelayClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token: RwLock::new(String::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn token(&self) -> String {
        self.token.read().clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write() = token.into();
    }

    /// Authenticate as this pod and cache the returned bearer token.
    pub async fn authenticate(&self, identity: &PodIdentity) -> Result<String, DirectoryError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let signature = identity.sign(&format!("{timestamp}{AUTH_ROLE}"));

        let response = self
            .http
            .post(format!("{}/api/auth", self.endpoint))
            .json(&json!({
                "signature": signature,
                "requester": identity.did(),
                "timestamp": timestamp,
                "role": AUTH_ROLE,
            }))
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DirectoryError::UnexpectedStatus {
                status: response.status().as_u16(),
                context: "authenticating",
            });
        }

        #[derive(Deserialize)]
        struct AuthResponse {
            jwt_token: String,
        }

        let auth: AuthResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;
        self.set_token(auth.jwt_token.clone());
        Ok(auth.jwt_token)
    }

    fn check(
        response: &reqwest::Response,
        context: &'static str,
    ) -> Result<(), DirectoryError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DirectoryError::UnexpectedStatus {
                status: response.status().as_u16(),
                context,
            })
        }
    }
}

#[async_trait]
impl DirectoryClient for RelayClient {
    async fn register_account(&self, registration_id: u32) -> Result<(), DirectoryError> {
        let response = self
            .http
            .post(format!("{}/api/accounts", self.endpoint))
            .bearer_auth(self.token())
            .json(&json!({
                "account_attributes": { "registrationId": registration_id },
                "disable_wallet": true,
            }))
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Self::check(&response, "registering account")
    }

    async fn upload_keys(&self, upload: &KeyUpload) -> Result<(), DirectoryError> {
        let prekeys: Vec<_> = upload
            .prekeys
            .iter()
            .map(|k| json!({ "keyId": k.id, "publicKey": versioned(&k.public_key) }))
            .collect();

        let response = self
            .http
            .put(format!("{}/api/messaging/keys", self.endpoint))
            .bearer_auth(self.token())
            .json(&json!({
                "identityKey": versioned(&upload.identity_key),
                "preKeys": prekeys,
                "signedPreKey": {
                    "keyId": upload.signed_prekey.id,
                    "publicKey": versioned(&upload.signed_prekey.public_key),
                    "signature": BASE64.encode(&upload.signed_prekey.signature),
                },
            }))
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Self::check(&response, "uploading keys")
    }

    async fn available_prekey_count(&self) -> Result<usize, DirectoryError> {
        let response = self
            .http
            .get(format!("{}/api/messaging/keys", self.endpoint))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Self::check(&response, "querying prekey inventory")?;

        #[derive(Deserialize)]
        struct CountResponse {
            count: usize,
        }

        let body: CountResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;
        Ok(body.count)
    }

    async fn peer_bundle(
        &self,
        did: &Did,
        device_id: u32,
    ) -> Result<PeerKeyBundle, DirectoryError> {
        let response = self
            .http
            .get(format!(
                "{}/api/messaging/keys/{}/{}",
                self.endpoint, did, device_id
            ))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Self::check(&response, "fetching peer bundle")?;

        response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))
    }

    async fn push_messages(
        &self,
        destination: &Did,
        messages: &[MessageEnvelope],
        timestamp: i64,
    ) -> Result<(), DirectoryError> {
        let response = self
            .http
            .put(format!(
                "{}/api/messaging/messages/{}",
                self.endpoint, destination
            ))
            .bearer_auth(self.token())
            .json(&json!({
                "destination": destination,
                "messages": messages,
                "timestamp": timestamp,
            }))
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Self::check(&response, "pushing messages")
    }

    async fn pull_messages(&self) -> Result<(Vec<MessageEnvelope>, bool), DirectoryError> {
        let response = self
            .http
            .get(format!("{}/api/messaging/messages", self.endpoint))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Self::check(&response, "pulling messages")?;

        #[derive(Deserialize)]
        struct PullResponse {
            #[serde(default)]
            messages: Vec<MessageEnvelope>,
            #[serde(default)]
            more: bool,
        }

        let body: PullResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;
        debug!(count = body.messages.len(), more = body.more, "pulled messages");
        Ok((body.messages, body.more))
    }

    async fn delete_message(&self, guid: Uuid) -> Result<(), DirectoryError> {
        let response = self
            .http
            .delete(format!(
                "{}/api/messaging/messages/uuid/{}",
                self.endpoint, guid
            ))
            .bearer_auth(self.token())
            .send()
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        Self::check(&response, "deleting message")
    }
}
