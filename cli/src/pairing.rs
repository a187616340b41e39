// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pairing client: the owner-device side of the binding handshake.
//!
//! Runs its own identity, key store, and messaging channel under
//! `<data_dir>/pairing/`, sends one command to the pod, and waits for the
//! decrypted reply on the same channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Subcommand;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::info;

use palisade_pod_core::application::courier::{run_inbound_pump, SessionCourier};
use palisade_pod_core::application::provisioner::KeyProvisioner;
use palisade_pod_core::domain::command::CommandReply;
use palisade_pod_core::domain::directory::DirectoryClient;
use palisade_pod_core::domain::engine::SessionAddress;
use palisade_pod_core::domain::identity::{verify_signature, Did, PodIdentity};
use palisade_pod_core::domain::messaging::MASTER_DEVICE_ID;
use palisade_pod_core::infrastructure::config::PodConfig;
use palisade_pod_core::infrastructure::olm::OlmEngine;
use palisade_pod_core::infrastructure::relay::RelayClient;
use palisade_pod_core::infrastructure::store::SledStore;
use palisade_pod_core::infrastructure::transport::{socket_url, ChannelMux};

const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Subcommand)]
pub enum PairCommand {
    /// Initiate a bind round and print the pod's receipt
    Bind,

    /// Answer an outstanding bind with the nonce it returned
    BindAck { nonce: String },

    /// Send a wrapped ledger RPC request (raw JSON body)
    Rpc { body: String },
}

struct PairingChannel {
    identity: Arc<PodIdentity>,
    pod: Did,
    courier: Arc<SessionCourier>,
    mux: ChannelMux,
    replies: mpsc::Receiver<palisade_pod_core::application::courier::DecryptedMessage>,
}

impl PairingChannel {
    async fn open(config: &PodConfig) -> Result<Self> {
        let Some(pod_did) = config.pod_did.clone() else {
            bail!("config is missing pod_did; the pairing client needs the pod's identity");
        };

        let data_dir = config.data_dir.join("pairing");
        let (identity, created) =
            PodIdentity::load_or_create(&data_dir.join("identity.json"))?;
        let identity = Arc::new(identity);
        info!(identity = %identity.did(), created, "pairing client identity");

        let store = Arc::new(SledStore::open(&data_dir.join("client.db"))?);
        let engine = Arc::new(OlmEngine::new(store.clone())?);
        let relay = Arc::new(RelayClient::new(config.relay.endpoint.clone()));

        relay.authenticate(&identity).await?;

        let provisioner = KeyProvisioner::new(identity.clone(), engine.clone(), store.clone());
        relay
            .register_account(provisioner.ensure_registration_id()?)
            .await?;
        let inventory = relay.available_prekey_count().await.unwrap_or(0);
        if let Some(upload) = provisioner.replenish(inventory)? {
            relay.upload_keys(&upload).await?;
        }

        let courier = Arc::new(SessionCourier::new(engine, relay.clone(), store));
        let url = socket_url(relay.endpoint())?;
        let (mux, raw_rx) = ChannelMux::connect(&url, &relay.token()).await?;

        let (reply_tx, replies) = mpsc::channel(100);
        tokio::spawn(run_inbound_pump(
            courier.clone(),
            mux.clone(),
            raw_rx,
            reply_tx,
        ));

        Ok(Self {
            identity,
            pod: Did::new(pod_did),
            courier,
            mux,
            replies,
        })
    }

    /// Send one command to the pod and wait for its decrypted reply.
    async fn call(&mut self, command: &str, args: Value) -> Result<CommandReply> {
        let request = serde_json::to_vec(&json!({
            "id": uuid::Uuid::new_v4().to_string(),
            "command": command,
            "args": args,
        }))?;

        let peer = SessionAddress::new(self.pod.clone(), MASTER_DEVICE_ID);
        let envelopes = self.courier.encrypt_batch(&peer, &[request]).await?;

        let status = self
            .mux
            .send(
                "send_messages",
                json!({
                    "destination": &self.pod,
                    "messages": envelopes,
                    "timestamp": Utc::now().timestamp(),
                }),
            )
            .await?;
        if !status.is_ok() {
            bail!("relay rejected the command: {}", status.error);
        }

        let reply = tokio::time::timeout(REPLY_TIMEOUT, self.replies.recv())
            .await
            .context("timed out waiting for the pod's reply")?
            .context("messaging channel closed before the pod replied")?;

        let reply: CommandReply = serde_json::from_slice(&reply.content)
            .context("pod reply is not a command response")?;
        if let Some(error) = &reply.error {
            bail!("pod returned an error: {error}");
        }
        Ok(reply)
    }
}

pub async fn handle_command(command: PairCommand, config: PodConfig) -> Result<()> {
    let mut channel = PairingChannel::open(&config).await?;

    match command {
        PairCommand::Bind => {
            let reply = channel.call("bind", Value::Null).await?;
            let data = reply.data.unwrap_or_default();

            let nonce = data["nonce"].as_str().unwrap_or_default().to_string();
            let timestamp = data["timestamp"].as_str().unwrap_or_default();
            let signature = data["signature"].as_str().unwrap_or_default();
            if !verify_signature(&channel.pod, &format!("{nonce}{timestamp}"), signature) {
                bail!("pod receipt signature does not verify against its DID");
            }

            info!(pod = %channel.pod, nonce, "bind ok");
            println!("{}", serde_json::to_string_pretty(&data)?);
        }

        PairCommand::BindAck { nonce } => {
            let timestamp = Utc::now().timestamp_millis().to_string();
            let signature = channel.identity.sign(&format!("{nonce}{timestamp}"));
            let reply = channel
                .call(
                    "bind_ack",
                    json!({ "timestamp": timestamp, "signature": signature }),
                )
                .await?;

            info!("bind ack ok");
            println!("{}", serde_json::to_string_pretty(&reply.data.unwrap_or_default())?);
        }

        PairCommand::Rpc { body } => {
            let args: Value = serde_json::from_str(&body).context("invalid RPC body")?;
            let reply = channel.call("bitcoind", args).await?;
            println!("{}", serde_json::to_string_pretty(&reply.data.unwrap_or_default())?);
        }
    }

    channel.mux.close().await;
    Ok(())
}
