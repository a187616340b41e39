// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod binding;
pub mod courier;
pub mod provisioner;
pub mod router;

pub use binding::{BindAckParams, BindReceipt, BindingHandshake, HandshakeError};
pub use courier::{CourierError, DecryptedMessage, SessionCourier};
pub use provisioner::{KeyProvisioner, ProvisionError};
pub use router::CommandRouter;
