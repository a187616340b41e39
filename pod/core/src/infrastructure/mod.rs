// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config;
pub mod ledger;
pub mod olm;
pub mod relay;
pub mod store;
pub mod transport;

pub use config::PodConfig;
pub use ledger::{DetachedWalletService, HttpLedgerGateway};
pub use olm::OlmEngine;
pub use relay::RelayClient;
pub use store::SledStore;
pub use transport::{ChannelMux, TransportError};
