// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Channel Multiplexer
//!
//! Owns the single websocket to the relay and turns it into:
//!
//! - a synchronous [`ChannelMux::send`]: concurrent callers each get the
//!   response matching their correlation id, or a 30 s timeout;
//! - a stream of raw `message` frames for the decrypt stage.
//!
//! ## Invariants
//!
//! - Allocating a correlation id, registering its waiter, and writing the
//!   frame happen inside one critical section; a response can never race an
//!   unregistered id.
//! - Exactly one reader task owns the socket for reads.
//! - Closing, whether local or remote, resolves every outstanding waiter with
//!   [`TransportError::ConnectionClosed`] immediately and closes the raw
//!   queue exactly once. `close` is idempotent and safe from any task.
//! - The raw queue is bounded; a full queue drops the frame with a warning
//!   instead of blocking the reader. Unacknowledged batches are redelivered
//!   by the relay, so dropping here only costs latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::command::CommandStatus;

/// How long a caller waits for its correlated response.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(60);
const RAW_QUEUE_CAPACITY: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket write failed: {0}")]
    Write(String),

    #[error("cannot encode frame: {0}")]
    Encode(String),

    #[error("websocket connection closed")]
    ConnectionClosed,

    #[error("timeout command response")]
    Timeout,

    #[error("invalid messaging endpoint: {0}")]
    BadEndpoint(String),
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Outer websocket frame: a correlated command response or a message batch.
#[derive(Debug, Deserialize)]
struct WsFrame {
    #[serde(rename = "type")]
    frame_type: String,
    data: Value,
}

struct MuxState {
    sink: Option<WsSink>,
    pending: HashMap<String, oneshot::Sender<CommandStatus>>,
    raw_tx: Option<mpsc::Sender<Value>>,
    closed: bool,
}

/// Resolve every waiter, close both internal channels, drop the writer.
/// Safe to call more than once; only the first call acts.
fn shutdown_locked(state: &mut MuxState) {
    if state.closed {
        return;
    }
    state.closed = true;
    state.sink = None;
    state.raw_tx = None;

    if !state.pending.is_empty() {
        debug!(
            waiters = state.pending.len(),
            "resolving unfulfilled command waiters"
        );
    }
    // Dropping a waiter wakes its caller with `ConnectionClosed`.
    state.pending.clear();
}

/// Derive the websocket endpoint from the relay's HTTP endpoint.
pub fn socket_url(endpoint: &str) -> Result<String, TransportError> {
    let mut url =
        url::Url::parse(endpoint).map_err(|e| TransportError::BadEndpoint(e.to_string()))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(TransportError::BadEndpoint(format!(
                "unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::BadEndpoint(endpoint.to_string()))?;
    url.set_path("/api/messaging/ws");
    Ok(url.to_string())
}

#[derive(Clone)]
pub struct ChannelMux {
    state: Arc<Mutex<MuxState>>,
}

impl ChannelMux {
    /// Dial the relay and start the reader and keepalive tasks. Returns the
    /// multiplexer and the receiving end of the raw `message` queue.
    pub async fn connect(
        url: &str,
        token: &str,
    ) -> Result<(Self, mpsc::Receiver<Value>), TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let bearer = format!("Bearer {token}")
            .parse()
            .map_err(|_| TransportError::Connect("malformed auth token".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        info!(url, "messaging channel connected");

        let (sink, source) = socket.split();
        let (raw_tx, raw_rx) = mpsc::channel(RAW_QUEUE_CAPACITY);

        let mux = Self {
            state: Arc::new(Mutex::new(MuxState {
                sink: Some(sink),
                pending: HashMap::new(),
                raw_tx: Some(raw_tx),
                closed: false,
            })),
        };

        tokio::spawn(read_loop(mux.clone(), source));
        tokio::spawn(keepalive_loop(mux.clone()));

        Ok((mux, raw_rx))
    }

    /// Issue one command and wait for its correlated response.
    pub async fn send(&self, command: &str, args: Value) -> Result<CommandStatus, TransportError> {
        let id = Uuid::new_v4().to_string();
        let (waiter_tx, waiter_rx) = oneshot::channel();

        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.closed {
                return Err(TransportError::ConnectionClosed);
            }
            let Some(sink) = state.sink.as_mut() else {
                return Err(TransportError::ConnectionClosed);
            };

            let frame = serde_json::to_string(&json!({
                "id": &id,
                "command": command,
                "args": args,
            }))
            .map_err(|e| TransportError::Encode(e.to_string()))?;

            debug!(%id, command, "send command");
            state.pending.insert(id.clone(), waiter_tx);
            if let Err(err) = sink.send(Message::Text(frame.into())).await {
                // A broken write kills the whole connection, not just this
                // command.
                error!(error = %err, "command write failed");
                state.pending.remove(&id);
                shutdown_locked(state);
                return Err(TransportError::Write(err.to_string()));
            }
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, waiter_rx).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(TransportError::ConnectionClosed),
            Err(_) => {
                self.state.lock().await.pending.remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Tear the connection down. Idempotent.
    pub async fn close(&self) {
        shutdown_locked(&mut *self.state.lock().await);
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

async fn read_loop(mux: ChannelMux, mut source: WsSource) {
    debug!("start listening websocket messages");
    while let Some(next) = source.next().await {
        let message = match next {
            Ok(message) => message,
            Err(err) => {
                error!(error = %err, "unable to read message");
                break;
            }
        };

        match message {
            Message::Text(text) => dispatch_frame(&mux, &text).await,
            Message::Close(_) => {
                info!("connection closed by server");
                break;
            }
            // Pings are answered by the protocol layer; pongs and binary
            // frames carry nothing for us.
            _ => {}
        }
    }

    mux.close().await;
    debug!("websocket reader finished");
}

async fn dispatch_frame(mux: &ChannelMux, text: &str) {
    let frame: WsFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            warn!(error = %err, "cannot decode websocket frame");
            return;
        }
    };

    match frame.frame_type.as_str() {
        "response" => {
            let status: CommandStatus = match serde_json::from_value(frame.data) {
                Ok(status) => status,
                Err(err) => {
                    warn!(error = %err, "cannot decode response frame");
                    return;
                }
            };
            if status.id.is_empty() {
                warn!("empty id in command response");
                return;
            }

            let waiter = mux.state.lock().await.pending.remove(&status.id);
            match waiter {
                Some(waiter) => {
                    // The caller may have timed out already; nothing to do
                    // then.
                    let _ = waiter.send(status);
                }
                None => warn!(id = %status.id, "command id not found"),
            }
        }
        "message" => {
            let guard = mux.state.lock().await;
            let Some(raw_tx) = guard.raw_tx.as_ref() else {
                return;
            };
            if let Err(err) = raw_tx.try_send(frame.data) {
                warn!(error = %err, "inbound message queue full; dropping frame");
            }
        }
        other => debug!(frame_type = other, "ignoring unknown frame type"),
    }
}

async fn keepalive_loop(mux: ChannelMux) {
    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    // The first tick fires immediately; the connection is fresh then.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let mut guard = mux.state.lock().await;
        let state = &mut *guard;
        if state.closed {
            break;
        }
        let Some(sink) = state.sink.as_mut() else {
            break;
        };

        debug!("send keepalive ping");
        if let Err(err) = sink.send(Message::Ping(b"keepalived".to_vec().into())).await {
            error!(error = %err, "unable to send keepalive ping");
            shutdown_locked(state);
            break;
        }
    }
    debug!("keepalive task finished");
}
