// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP adapters for the ledger daemon and its supervisor.
//!
//! The `bitcoind` passthrough forwards the wrapped RPC body with basic auth
//! and wraps the daemon's HTTP status and raw JSON body into the reply; the
//! supervisor endpoints (`/start`, `/stop`, `/status`) are plain proxies.
//! Wallet construction and PSBT settlement are external collaborators, so
//! the default wallet service only reports itself as detached.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::error;

use crate::domain::handlers::{
    CreateWalletParams, FinishPsbtParams, HandlerError, LedgerGateway, LedgerRpcParams,
    WalletCommands,
};

pub struct HttpLedgerGateway {
    http: reqwest::Client,
    rpc_url: String,
    rpc_user: String,
    rpc_password: String,
    control_url: String,
}

impl HttpLedgerGateway {
    pub fn new(
        rpc_url: impl Into<String>,
        rpc_user: impl Into<String>,
        rpc_password: impl Into<String>,
        control_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            rpc_user: rpc_user.into(),
            rpc_password: rpc_password.into(),
            control_url: control_url.into(),
        }
    }

    async fn control_request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> Result<Value, HandlerError> {
        let response = self
            .http
            .request(method, format!("{}{}", self.control_url, path))
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, path, "ledger supervisor unreachable");
                HandlerError::Failed("fail to call bitcoind-ctl api".into())
            })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|err| {
            error!(error = %err, path, "ledger supervisor response unreadable");
            HandlerError::Failed("fail to call bitcoind-ctl api".into())
        })?;

        Ok(json!({
            "statusCode": status,
            "responseBody": BASE64.encode(&body),
        }))
    }
}

#[async_trait]
impl LedgerGateway for HttpLedgerGateway {
    async fn call(&self, params: &LedgerRpcParams) -> Result<Value, HandlerError> {
        let response = self
            .http
            .post(&self.rpc_url)
            .basic_auth(&self.rpc_user, Some(&self.rpc_password))
            .json(&json!({ "method": params.method, "params": params.params }))
            .send()
            .await
            .map_err(|e| HandlerError::Failed(e.to_string()))?;

        let status = response.status().as_u16();

        // An auth failure carries no body worth relaying.
        let body = if status == 401 {
            Value::Null
        } else {
            let raw = response
                .bytes()
                .await
                .map_err(|e| HandlerError::Failed(e.to_string()))?;
            serde_json::from_slice(&raw).unwrap_or(Value::Null)
        };

        Ok(json!({
            "statusCode": status,
            "responseBody": body,
        }))
    }

    async fn start_node(&self) -> Result<Value, HandlerError> {
        self.control_request(reqwest::Method::POST, "/start").await
    }

    async fn stop_node(&self) -> Result<Value, HandlerError> {
        self.control_request(reqwest::Method::POST, "/stop").await
    }

    async fn node_status(&self) -> Result<Value, HandlerError> {
        self.control_request(reqwest::Method::GET, "/status").await
    }
}

/// Wallet service stand-in for deployments where descriptor and PSBT
/// handling runs elsewhere.
pub struct DetachedWalletService;

#[async_trait]
impl WalletCommands for DetachedWalletService {
    async fn create_wallet(&self, _params: &CreateWalletParams) -> Result<Value, HandlerError> {
        Err(HandlerError::Unavailable("wallet service"))
    }

    async fn finish_psbt(&self, _params: &FinishPsbtParams) -> Result<Value, HandlerError> {
        Err(HandlerError::Unavailable("wallet service"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn rpc_passthrough_wraps_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .match_body(Matcher::PartialJson(json!({ "method": "getbalances" })))
            .with_status(200)
            .with_body(r#"{"result": {"mine": {"trusted": 1.5}}}"#)
            .create_async()
            .await;

        let gateway = HttpLedgerGateway::new(server.url() + "/", "user", "pass", String::new());
        let reply = gateway
            .call(&LedgerRpcParams {
                method: "getbalances".into(),
                params: json!([]),
            })
            .await
            .unwrap();

        assert_eq!(reply["statusCode"], 200);
        assert_eq!(reply["responseBody"]["result"]["mine"]["trusted"], 1.5);
    }

    #[tokio::test]
    async fn auth_failure_relays_no_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/")
            .with_status(401)
            .with_body("unauthorized")
            .create_async()
            .await;

        let gateway = HttpLedgerGateway::new(server.url() + "/", "user", "wrong", String::new());
        let reply = gateway
            .call(&LedgerRpcParams {
                method: "getbalances".into(),
                params: Value::Null,
            })
            .await
            .unwrap();

        assert_eq!(reply["statusCode"], 401);
        assert_eq!(reply["responseBody"], Value::Null);
    }

    #[tokio::test]
    async fn supervisor_status_is_base64_wrapped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_body("running")
            .create_async()
            .await;

        let gateway = HttpLedgerGateway::new(String::new(), "", "", server.url());
        let reply = gateway.node_status().await.unwrap();

        assert_eq!(reply["statusCode"], 200);
        assert_eq!(reply["responseBody"], BASE64.encode(b"running"));
    }

    #[tokio::test]
    async fn detached_wallet_reports_unavailable() {
        let wallet = DetachedWalletService;
        let err = wallet
            .create_wallet(&CreateWalletParams {
                descriptor: "wsh(sortedmulti(2))".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Unavailable(_)));
    }
}
