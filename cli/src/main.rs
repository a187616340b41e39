// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Palisade Pod CLI
//!
//! The `palisade` binary runs the wallet pod's secure command channel.
//!
//! ## Commands
//!
//! - `palisade run` (default): connect to the relay and serve commands
//! - `palisade pair bind|bind-ack|rpc`: drive the owner side of the
//!   pairing handshake against a running pod
//!
//! The daemon keeps one websocket to the relay alive: authentication with
//! bounded retries, a token-renewal task, a prekey-refill task, the
//! decrypt/ack pump, and an outer reconnect loop. Exhausting the reconnect
//! budget is fatal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use palisade_pod_core::application::courier::{run_inbound_pump, DecryptedMessage, SessionCourier};
use palisade_pod_core::application::provisioner::KeyProvisioner;
use palisade_pod_core::application::router::CommandRouter;
use palisade_pod_core::domain::access::AccessPolicy;
use palisade_pod_core::domain::directory::DirectoryClient;
use palisade_pod_core::domain::engine::SessionAddress;
use palisade_pod_core::domain::identity::{Did, PodIdentity};
use palisade_pod_core::domain::messaging::MASTER_DEVICE_ID;
use palisade_pod_core::infrastructure::config::PodConfig;
use palisade_pod_core::infrastructure::ledger::{DetachedWalletService, HttpLedgerGateway};
use palisade_pod_core::infrastructure::olm::OlmEngine;
use palisade_pod_core::infrastructure::relay::RelayClient;
use palisade_pod_core::infrastructure::store::SledStore;
use palisade_pod_core::infrastructure::transport::{socket_url, ChannelMux};

mod pairing;

/// Refresh the relay token once it is this close to expiry.
const TOKEN_RENEW_BEFORE: i64 = 10 * 60;

/// Palisade wallet pod - owner-paired secure command channel
#[derive(Parser)]
#[command(name = "palisade")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "PALISADE_CONFIG",
        default_value = "./config.yaml",
        value_name = "FILE"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "PALISADE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Seconds between relay retries
    #[arg(long, global = true, default_value_t = 10)]
    retry_interval: u64,

    /// Retry budget for relay authentication and reconnects
    #[arg(long, global = true, default_value_t = 12)]
    retry_count: u32,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pod daemon
    Run,

    /// Pairing-client operations against a running pod
    Pair {
        #[command(subcommand)]
        command: pairing::PairCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = PodConfig::load(&cli.config)?;

    match cli.command {
        None | Some(Commands::Run) => run_pod(&cli, config).await,
        Some(Commands::Pair { command }) => pairing::handle_command(command, config).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}

async fn run_pod(cli: &Cli, config: PodConfig) -> Result<()> {
    let (identity, created) = PodIdentity::load_or_create(&config.identity_path())
        .context("fail to create or load identity")?;
    let identity = Arc::new(identity);
    let owner = Did::new(config.owner_did.clone());
    info!(owner = %owner, identity = %identity.did(), created, "pod controller initialized");

    let store = Arc::new(SledStore::open(&config.db_path())?);
    let engine = Arc::new(OlmEngine::new(store.clone())?);
    let relay = Arc::new(RelayClient::new(config.relay.endpoint.clone()));
    let provisioner = Arc::new(KeyProvisioner::new(
        identity.clone(),
        engine.clone(),
        store.clone(),
    ));
    let courier = Arc::new(SessionCourier::new(
        engine.clone(),
        relay.clone(),
        store.clone(),
    ));
    let router = Arc::new(CommandRouter::new(
        identity.clone(),
        owner,
        store.clone(),
        AccessPolicy::default(),
        Arc::new(HttpLedgerGateway::new(
            config.ledger.rpc_url.clone(),
            config.ledger.rpc_user.clone(),
            config.ledger.rpc_password.clone(),
            config.ledger.control_url.clone(),
        )),
        Arc::new(DetachedWalletService),
    ));

    authenticate_with_retry(&relay, &identity, cli.retry_count, cli.retry_interval).await?;
    tokio::spawn(renew_token_loop(relay.clone(), identity.clone()));

    // Main loop for maintaining a persistent messaging channel to the relay.
    'connection: loop {
        let mut channel = None;
        for attempt in 0..cli.retry_count {
            if attempt != 0 {
                tokio::time::sleep(Duration::from_secs(cli.retry_interval)).await;
            }
            match establish_channel(&relay, &provisioner).await {
                Ok(pair) => {
                    channel = Some(pair);
                    break;
                }
                Err(err) => error!(error = %err, attempt, "fail to establish messaging channel"),
            }
        }
        let Some((mux, raw_rx)) = channel else {
            anyhow::bail!(
                "maximum retries ({}) exceeded for establishing the messaging channel",
                cli.retry_count
            );
        };

        let (decrypted_tx, mut decrypted_rx) = mpsc::channel(1000);
        tokio::spawn(run_inbound_pump(
            courier.clone(),
            mux.clone(),
            raw_rx,
            decrypted_tx,
        ));

        let (refill_tx, refill_rx) = mpsc::channel(1);
        tokio::spawn(refill_loop(relay.clone(), provisioner.clone(), refill_rx));

        // Watch and process new messages until the channel dies.
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("service interrupted");
                    mux.close().await;
                    break 'connection;
                }
                message = decrypted_rx.recv() => {
                    let Some(message) = message else {
                        info!("messaging channel closed; reconnecting");
                        mux.close().await;
                        break;
                    };
                    handle_message(&router, &courier, &mux, message).await;
                    // Nudge the refill task; it coalesces bursts.
                    let _ = refill_tx.try_send(());
                }
            }
        }
    }

    Ok(())
}

async fn authenticate_with_retry(
    relay: &RelayClient,
    identity: &PodIdentity,
    retry_count: u32,
    retry_interval: u64,
) -> Result<()> {
    for attempt in 0..retry_count {
        if attempt != 0 {
            tokio::time::sleep(Duration::from_secs(retry_interval)).await;
        }
        match relay.authenticate(identity).await {
            Ok(_) => return Ok(()),
            Err(err) => error!(error = %err, attempt, "pod authentication fail"),
        }
    }
    anyhow::bail!("maximum retries ({retry_count}) exceeded for pod authentication")
}

/// Register the account, top up the prekey inventory, and dial the socket.
async fn establish_channel(
    relay: &Arc<RelayClient>,
    provisioner: &KeyProvisioner,
) -> Result<(ChannelMux, mpsc::Receiver<serde_json::Value>)> {
    relay
        .register_account(provisioner.ensure_registration_id()?)
        .await?;

    let inventory = relay.available_prekey_count().await?;
    if let Some(upload) = provisioner.replenish(inventory)? {
        relay.upload_keys(&upload).await?;
    }

    let url = socket_url(relay.endpoint())?;
    let (mux, raw_rx) = ChannelMux::connect(&url, &relay.token()).await?;
    Ok((mux, raw_rx))
}

async fn handle_message(
    router: &CommandRouter,
    courier: &SessionCourier,
    mux: &ChannelMux,
    message: DecryptedMessage,
) {
    debug!(source = %message.source, "receive message");
    let frames = router.process(&message.source, &message.content).await;
    if frames.is_empty() {
        return;
    }

    let device = if message.source_device == 0 {
        MASTER_DEVICE_ID
    } else {
        message.source_device
    };
    let peer = SessionAddress::new(message.source.clone(), device);

    let envelopes = match courier.encrypt_batch(&peer, &frames).await {
        Ok(envelopes) => envelopes,
        Err(err) => {
            error!(peer = %peer, error = %err, "cannot encrypt response");
            return;
        }
    };

    let args = json!({
        "destination": message.source,
        "messages": envelopes,
        "timestamp": Utc::now().timestamp(),
    });
    match mux.send("send_messages", args).await {
        Ok(status) if !status.is_ok() => {
            warn!(error = %status.error, "send_messages rejected")
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "cannot send response"),
    }
}

/// Top the relay's prekey inventory back up after message activity.
async fn refill_loop(
    relay: Arc<RelayClient>,
    provisioner: Arc<KeyProvisioner>,
    mut notify: mpsc::Receiver<()>,
) {
    while notify.recv().await.is_some() {
        debug!("refill prekeys");
        match relay.available_prekey_count().await {
            Ok(inventory) => match provisioner.replenish(inventory) {
                Ok(Some(upload)) => {
                    if let Err(err) = relay.upload_keys(&upload).await {
                        error!(error = %err, "failed to upload refilled prekeys");
                    }
                }
                Ok(None) => {}
                Err(err) => error!(error = %err, "failed to refill prekeys"),
            },
            Err(err) => error!(error = %err, "failed to query prekey inventory"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    debug!("refill task closed");
}

/// Re-authenticate whenever the relay token comes within
/// [`TOKEN_RENEW_BEFORE`] of its expiry.
async fn renew_token_loop(relay: Arc<RelayClient>, identity: Arc<PodIdentity>) {
    loop {
        let token = relay.token();
        if token.is_empty() {
            // Wait out the first authentication.
            tokio::time::sleep(Duration::from_secs(1)).await;
            continue;
        }

        match token_expiry(&token) {
            Some(expires_at) => {
                if Utc::now().timestamp() > expires_at - TOKEN_RENEW_BEFORE {
                    match relay.authenticate(&identity).await {
                        Ok(_) => info!("successfully refreshed relay token"),
                        Err(err) => error!(error = %err, "fail to refresh token"),
                    }
                } else {
                    debug!(expires_at, "token not expired");
                }
            }
            None => warn!("cannot parse relay token claims"),
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}

/// Read the `exp` claim without validating the relay's signature; the token
/// is the relay's own credential, the pod only needs the renewal deadline.
fn token_expiry(token: &str) -> Option<i64> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(&[]),
        &validation,
    )
    .ok()?;
    data.claims.exp
}
