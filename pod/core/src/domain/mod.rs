// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod access;
pub mod binding;
pub mod command;
pub mod directory;
pub mod engine;
pub mod handlers;
pub mod identity;
pub mod messaging;
pub mod store;

pub use access::{AccessMode, AccessPolicy};
pub use binding::{BindingError, BindingState};
pub use command::{CommandReply, CommandRequest, CommandStatus};
pub use directory::{DirectoryClient, DirectoryError, KeyUpload, PeerKeyBundle};
pub use engine::{EncryptionEngine, EngineError, SealedMessage, SessionAddress};
pub use handlers::{HandlerError, LedgerGateway, WalletCommands};
pub use identity::{Did, IdentityError, PodIdentity};
pub use messaging::{MessageBatch, MessageEnvelope, WireType};
pub use store::{KeyStore, PodStore, SignedPrekeyRecord, StoreError};
