// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Business handler ports. The router's responsibility toward these ends at
//! authorization and argument-shape validation; everything behind them
//! (descriptor construction, PSBT signing, node supervision) belongs to
//! external collaborators.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error("{0} is not attached")]
    Unavailable(&'static str),
}

/// Arguments of the wrapped `bitcoind` passthrough.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerRpcParams {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWalletParams {
    pub descriptor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FinishPsbtParams {
    pub psbt: String,
}

/// Pass-through to the ledger daemon and its supervisor.
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Forward one raw RPC call; the reply wraps the daemon's HTTP status
    /// and body verbatim.
    async fn call(&self, params: &LedgerRpcParams) -> Result<Value, HandlerError>;

    async fn start_node(&self) -> Result<Value, HandlerError>;
    async fn stop_node(&self) -> Result<Value, HandlerError>;
    async fn node_status(&self) -> Result<Value, HandlerError>;
}

/// Wallet construction and settlement operations.
#[async_trait]
pub trait WalletCommands: Send + Sync {
    async fn create_wallet(&self, params: &CreateWalletParams) -> Result<Value, HandlerError>;
    async fn finish_psbt(&self, params: &FinishPsbtParams) -> Result<Value, HandlerError>;
}
