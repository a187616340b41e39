// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Palisade Pod Core
//!
//! Secure command channel for an owner-paired wallet pod.
//!
//! # Architecture
//!
//! - **domain**: identities, binding state machine, access policy, wire
//!   envelopes, and the ports the channel depends on (durable store,
//!   encryption engine, directory client, business handlers).
//! - **application**: the services that drive the channel (key provisioner,
//!   session courier, binding handshake, command router).
//! - **infrastructure**: sled store, relay REST client, websocket
//!   multiplexer, vodozemac engine adapter, ledger-daemon gateway.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
