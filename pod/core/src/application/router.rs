// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Command Router
//!
//! Single entry point for decrypted application messages. Each request
//! passes a chain of hard gates (decode, tier resolution, command
//! allow-list, binding state) before being dispatched, and every gate
//! failure short-circuits into an error response for that request alone.
//!
//! Handlers return `Result`; the router is the per-request error boundary
//! that folds any failure into a `{id, error}` frame. Nothing a single
//! request does may take down the connection loop.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::application::binding::{BindAckParams, BindingHandshake};
use crate::domain::access::{AccessMode, AccessPolicy};
use crate::domain::command::{CommandReply, CommandRequest};
use crate::domain::handlers::{
    CreateWalletParams, FinishPsbtParams, LedgerGateway, LedgerRpcParams, WalletCommands,
};
use crate::domain::identity::{Did, PodIdentity};
use crate::domain::store::PodStore;

/// Arguments of the `set_member` command.
#[derive(Debug, Clone, Deserialize)]
pub struct SetMemberParams {
    pub member_did: Did,
    pub access_mode: AccessMode,
}

/// Arguments of the `remove_member` command.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoveMemberParams {
    pub member_did: Did,
}

pub struct CommandRouter {
    owner: Did,
    store: Arc<dyn PodStore>,
    policy: AccessPolicy,
    handshake: BindingHandshake,
    ledger: Arc<dyn LedgerGateway>,
    wallet: Arc<dyn WalletCommands>,
}

impl CommandRouter {
    pub fn new(
        identity: Arc<PodIdentity>,
        owner: Did,
        store: Arc<dyn PodStore>,
        policy: AccessPolicy,
        ledger: Arc<dyn LedgerGateway>,
        wallet: Arc<dyn WalletCommands>,
    ) -> Self {
        let handshake = BindingHandshake::new(identity, owner.clone(), store.clone());
        Self {
            owner,
            store,
            policy,
            handshake,
            ledger,
            wallet,
        }
    }

    /// Handle one decrypted request and produce the response frames to send
    /// back to its source.
    pub async fn process(&self, source: &Did, plaintext: &[u8]) -> Vec<Vec<u8>> {
        let request: CommandRequest = match serde_json::from_slice(plaintext) {
            Ok(request) => request,
            Err(err) => {
                warn!(source = %source, error = %err, "cannot decode command request");
                return vec![CommandReply::fail("", "malformed command request").into_frame()];
            }
        };

        debug!(source = %source, command = %request.command, id = %request.id, "command received");

        let mode = self.access_mode(source);
        if !self.policy.allows_command(&request.command, mode) {
            return reply_error(&request.id, "not allowed to use this command");
        }

        if !self.binding_state_permits(source, &request.command) {
            return reply_error(&request.id, "incorrect binding state");
        }

        let outcome = self.dispatch(source, mode, &request).await;
        match outcome {
            Ok(data) => vec![CommandReply::ok(request.id, data).into_frame()],
            Err(message) => reply_error(&request.id, &message),
        }
    }

    async fn dispatch(
        &self,
        source: &Did,
        mode: AccessMode,
        request: &CommandRequest,
    ) -> Result<Value, String> {
        match request.command.as_str() {
            "bind" => self
                .handshake
                .bind(source)
                .map_err(|e| e.to_string())
                .and_then(|receipt| serde_json::to_value(receipt).map_err(|e| e.to_string())),

            "bind_ack" => {
                let params: BindAckParams = parse_args(request, "bind_ack")?;
                self.handshake
                    .acknowledge(source, &params)
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "status": "ok" }))
            }

            "set_member" => {
                let params: SetMemberParams = parse_args(request, "set_member")?;
                self.store
                    .update_member_access_mode(&params.member_did, params.access_mode)
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "status": "ok" }))
            }

            "remove_member" => {
                let params: RemoveMemberParams = parse_args(request, "remove_member")?;
                self.store
                    .remove_member(&params.member_did)
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "status": "ok" }))
            }

            "bitcoind" => {
                let params: LedgerRpcParams = parse_args(request, "bitcoind")?;
                if !self.policy.allows_ledger_rpc(&params.method, mode) {
                    return Err("not allowed to use this RPC".into());
                }
                self.ledger.call(&params).await.map_err(|e| e.to_string())
            }

            "start_bitcoind" => self.ledger.start_node().await.map_err(|e| e.to_string()),
            "stop_bitcoind" => self.ledger.stop_node().await.map_err(|e| e.to_string()),
            "get_bitcoind_status" => self.ledger.node_status().await.map_err(|e| e.to_string()),

            "create_wallet" => {
                let params: CreateWalletParams = parse_args(request, "create_wallet")?;
                self.wallet
                    .create_wallet(&params)
                    .await
                    .map_err(|e| e.to_string())
            }

            "finish_psbt" => {
                let params: FinishPsbtParams = parse_args(request, "finish_psbt")?;
                self.wallet
                    .finish_psbt(&params)
                    .await
                    .map_err(|e| e.to_string())
            }

            _ => Err("unsupported command".into()),
        }
    }

    /// Resolve a caller's tier: the owner is implicitly `Full`, everyone
    /// else gets their stored grant or `NotApplicant`. A store failure
    /// denies rather than propagating.
    fn access_mode(&self, did: &Did) -> AccessMode {
        if *did == self.owner {
            return AccessMode::Full;
        }

        match self.store.member_access_mode(did) {
            Ok(mode) => mode,
            Err(err) => {
                warn!(did = %did, error = %err, "member grant lookup failed; denying");
                AccessMode::NotApplicant
            }
        }
    }

    /// Binding commands require an incomplete handshake; everything else
    /// requires a completed one.
    fn binding_state_permits(&self, did: &Did, command: &str) -> bool {
        let bound = match self.store.binding_state(did) {
            Ok(state) => state.is_bound(),
            Err(err) => {
                warn!(did = %did, error = %err, "binding state lookup failed; denying");
                return false;
            }
        };

        match command {
            "bind" | "bind_ack" => !bound,
            _ => bound,
        }
    }
}

fn parse_args<'a, T: Deserialize<'a>>(
    request: &'a CommandRequest,
    command: &str,
) -> Result<T, String> {
    T::deserialize(&request.args).map_err(|e| format!("bad request for {command}: {e}"))
}

fn reply_error(id: &str, message: &str) -> Vec<Vec<u8>> {
    vec![CommandReply::fail(id, message).into_frame()]
}
