// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end command channel tests: two real Olm engines, an in-memory
//! directory standing in for the relay, the courier on both sides, and the
//! router on the pod side.
//!
//! The wire is simulated by handing envelopes straight from one courier to
//! the other; transport-level behavior has its own tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use uuid::Uuid;

use palisade_pod_core::application::courier::SessionCourier;
use palisade_pod_core::application::provisioner::KeyProvisioner;
use palisade_pod_core::application::router::CommandRouter;
use palisade_pod_core::domain::access::{AccessMode, AccessPolicy};
use palisade_pod_core::domain::command::CommandReply;
use palisade_pod_core::domain::directory::{
    DeviceKeys, DirectoryClient, DirectoryError, KeyUpload, PeerKeyBundle,
};
use palisade_pod_core::domain::engine::SessionAddress;
use palisade_pod_core::domain::handlers::{
    CreateWalletParams, FinishPsbtParams, HandlerError, LedgerGateway, LedgerRpcParams,
    WalletCommands,
};
use palisade_pod_core::domain::identity::{verify_signature, Did, PodIdentity};
use palisade_pod_core::domain::messaging::{MessageEnvelope, MASTER_DEVICE_ID};
use palisade_pod_core::domain::store::PodStore;
use palisade_pod_core::infrastructure::olm::OlmEngine;
use palisade_pod_core::infrastructure::store::SledStore;

/// Shared "relay": published bundles by DID.
#[derive(Default)]
struct Board {
    bundles: Mutex<HashMap<String, PeerKeyBundle>>,
}

/// Directory double for one actor: uploads land on the shared board under
/// the actor's DID, bundle fetches read any DID off the board.
struct BoardDirectory {
    actor: Did,
    board: Arc<Board>,
}

#[async_trait]
impl DirectoryClient for BoardDirectory {
    async fn register_account(&self, _registration_id: u32) -> Result<(), DirectoryError> {
        Ok(())
    }

    async fn upload_keys(&self, upload: &KeyUpload) -> Result<(), DirectoryError> {
        let bundle = PeerKeyBundle {
            identity_key: upload.identity_key.clone(),
            devices: vec![DeviceKeys {
                device_id: MASTER_DEVICE_ID,
                registration_id: 4242,
                signed_prekey: upload.signed_prekey.clone(),
                prekey: upload.prekeys.first().cloned().ok_or(
                    DirectoryError::UnexpectedStatus {
                        status: 400,
                        context: "uploading keys",
                    },
                )?,
            }],
        };
        self.board
            .bundles
            .lock()
            .insert(self.actor.as_str().to_string(), bundle);
        Ok(())
    }

    async fn available_prekey_count(&self) -> Result<usize, DirectoryError> {
        Ok(0)
    }

    async fn peer_bundle(
        &self,
        did: &Did,
        _device_id: u32,
    ) -> Result<PeerKeyBundle, DirectoryError> {
        self.board
            .bundles
            .lock()
            .get(did.as_str())
            .cloned()
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

    async fn delete_message(&self, _guid: Uuid) -> Result<(), DirectoryError> {
        Ok(())
    }
}

struct ScriptedLedger;

#[async_trait]
impl LedgerGateway for ScriptedLedger {
    async fn call(&self, params: &LedgerRpcParams) -> Result<Value, HandlerError> {
        Ok(json!({ "statusCode": 200, "forwarded": params.method }))
    }

    async fn start_node(&self) -> Result<Value, HandlerError> {
        Ok(json!({ "statusCode": 200 }))
    }

    async fn stop_node(&self) -> Result<Value, HandlerError> {
        Ok(json!({ "statusCode": 200 }))
    }

    async fn node_status(&self) -> Result<Value, HandlerError> {
        Ok(json!({ "statusCode": 200 }))
    }
}

struct ScriptedWallet;

#[async_trait]
impl WalletCommands for ScriptedWallet {
    async fn create_wallet(&self, params: &CreateWalletParams) -> Result<Value, HandlerError> {
        Ok(json!({ "descriptor": params.descriptor }))
    }

    async fn finish_psbt(&self, _params: &FinishPsbtParams) -> Result<Value, HandlerError> {
        Ok(json!({ "txid": "00".repeat(32) }))
    }
}

/// One party on the channel: identity, engine, courier, provisioned keys.
struct Party {
    identity: Arc<PodIdentity>,
    store: Arc<SledStore>,
    courier: SessionCourier,
    _dir: tempfile::TempDir,
}

impl Party {
    async fn provision(board: &Arc<Board>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SledStore::open(&dir.path().join("party.db")).unwrap());
        let identity = Arc::new(PodIdentity::generate());
        let engine = Arc::new(OlmEngine::new(store.clone()).unwrap());
        let directory = Arc::new(BoardDirectory {
            actor: identity.did().clone(),
            board: board.clone(),
        });

        let provisioner = KeyProvisioner::new(identity.clone(), engine.clone(), store.clone());
        let upload = provisioner.replenish(0).unwrap().expect("fresh party");
        directory.upload_keys(&upload).await.unwrap();

        let courier = SessionCourier::new(engine, directory, store.clone());
        Party {
            identity,
            store,
            courier,
            _dir: dir,
        }
    }

    fn did(&self) -> &Did {
        self.identity.did()
    }
}

/// Carry `frames` from `from` to `to` over the simulated wire, returning the
/// decrypted plaintexts in order.
async fn deliver(from: &Party, to: &Party, frames: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let peer = SessionAddress::new(to.did().clone(), MASTER_DEVICE_ID);
    let envelopes = from.courier.encrypt_batch(&peer, frames).await.unwrap();

    envelopes
        .into_iter()
        .map(|mut envelope| {
            envelope.source = from.did().as_str().to_string();
            envelope.source_device = MASTER_DEVICE_ID;
            to.courier
                .decrypt_inbound(&envelope)
                .expect("envelope must decrypt")
        })
        .collect()
}

async fn call(owner: &Party, pod: &Party, router: &CommandRouter, request: Value) -> CommandReply {
    let raw = serde_json::to_vec(&request).unwrap();
    let delivered = deliver(owner, pod, &[raw]).await;
    assert_eq!(delivered.len(), 1);

    let response_frames = router.process(owner.did(), &delivered[0]).await;
    assert_eq!(response_frames.len(), 1);

    let replies = deliver(pod, owner, &response_frames).await;
    serde_json::from_slice(&replies[0]).unwrap()
}

fn router_for(pod: &Party, owner: &Did) -> CommandRouter {
    CommandRouter::new(
        pod.identity.clone(),
        owner.clone(),
        pod.store.clone(),
        AccessPolicy::default(),
        Arc::new(ScriptedLedger),
        Arc::new(ScriptedWallet),
    )
}

#[tokio::test]
async fn owner_pairs_and_runs_an_authorized_rpc() {
    let board = Arc::new(Board::default());
    let pod = Party::provision(&board).await;
    let owner = Party::provision(&board).await;
    let router = router_for(&pod, owner.did());

    // bind: the receipt's signature verifies against the pod's own DID.
    let reply = call(
        &owner,
        &pod,
        &router,
        json!({ "id": "1", "command": "bind", "args": null }),
    )
    .await;
    let receipt = reply.data.expect("bind receipt");
    let nonce = receipt["nonce"].as_str().unwrap().to_string();
    let timestamp = receipt["timestamp"].as_str().unwrap();
    assert_eq!(receipt["identity"].as_str().unwrap(), pod.did().as_str());
    assert!(verify_signature(
        pod.did(),
        &format!("{nonce}{timestamp}"),
        receipt["signature"].as_str().unwrap()
    ));

    // bind_ack: the owner signs nonce ++ timestamp with its own key.
    let ack_timestamp = "1618456405107";
    let signature = owner.identity.sign(&format!("{nonce}{ack_timestamp}"));
    let reply = call(
        &owner,
        &pod,
        &router,
        json!({
            "id": "2",
            "command": "bind_ack",
            "args": { "timestamp": ack_timestamp, "signature": signature },
        }),
    )
    .await;
    assert_eq!(reply.data.unwrap()["status"], "ok");
    assert!(pod.store.binding_state(owner.did()).unwrap().is_bound());

    // An authorized wrapped RPC is forwarded to the ledger handler.
    let reply = call(
        &owner,
        &pod,
        &router,
        json!({
            "id": "3",
            "command": "bitcoind",
            "args": { "method": "getbalances", "params": [] },
        }),
    )
    .await;
    assert_eq!(reply.data.unwrap()["forwarded"], "getbalances");
}

#[tokio::test]
async fn stranger_without_grant_is_rejected() {
    let board = Arc::new(Board::default());
    let pod = Party::provision(&board).await;
    let owner = Party::provision(&board).await;
    let stranger = Party::provision(&board).await;
    let router = router_for(&pod, owner.did());

    let raw = serde_json::to_vec(&json!({
        "id": "1",
        "command": "bitcoind",
        "args": { "method": "getbalances" },
    }))
    .unwrap();

    // The message decrypts fine; authorization is what rejects it.
    let delivered = deliver(&stranger, &pod, &[raw]).await;
    let frames = router.process(stranger.did(), &delivered[0]).await;
    let replies = deliver(&pod, &stranger, &frames).await;

    let reply: CommandReply = serde_json::from_slice(&replies[0]).unwrap();
    assert_eq!(
        reply.error.as_deref(),
        Some("not allowed to use this command")
    );
}

#[tokio::test]
async fn granted_member_reaches_only_its_tier() {
    let board = Arc::new(Board::default());
    let pod = Party::provision(&board).await;
    let owner = Party::provision(&board).await;
    let member = Party::provision(&board).await;
    let router = router_for(&pod, owner.did());

    pod.store
        .update_member_access_mode(member.did(), AccessMode::Minimal)
        .unwrap();
    pod.store
        .put_binding_state(
            member.did(),
            &palisade_pod_core::domain::binding::BindingState::Bound,
        )
        .unwrap();

    // get_bitcoind_status is on the Minimal allow-list...
    let reply = call(
        &member,
        &pod,
        &router,
        json!({ "id": "1", "command": "get_bitcoind_status", "args": null }),
    )
    .await;
    assert!(reply.data.is_some());

    // ...but member management is not.
    let reply = call(
        &member,
        &pod,
        &router,
        json!({
            "id": "2",
            "command": "remove_member",
            "args": { "member_did": owner.did() },
        }),
    )
    .await;
    assert_eq!(
        reply.error.as_deref(),
        Some("not allowed to use this command")
    );
}

#[tokio::test]
async fn conversation_survives_session_reuse() {
    let board = Arc::new(Board::default());
    let pod = Party::provision(&board).await;
    let owner = Party::provision(&board).await;

    // Several round trips over the same pair of sessions; the ratchet state
    // persisted by the engines keeps decrypting.
    for round in 0..5u32 {
        let payload = format!("ping-{round}").into_bytes();
        let delivered = deliver(&owner, &pod, &[payload.clone()]).await;
        assert_eq!(delivered[0], payload);

        let answer = format!("pong-{round}").into_bytes();
        let returned = deliver(&pod, &owner, &[answer.clone()]).await;
        assert_eq!(returned[0], answer);
    }
}
