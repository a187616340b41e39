// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Access Gate
//!
//! Two independent policy tables are consulted for every inbound request:
//!
//! 1. the **command allow-list**, mapping an [`AccessMode`] tier to the
//!    top-level commands it may invoke;
//! 2. the **wrapped-RPC allow-list**, restricting which ledger-daemon methods
//!    the `bitcoind` passthrough may forward, independent of the outer check.
//!
//! The policy is an immutable object constructed once at startup and shared
//! by reference; nothing mutates it at runtime.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Authorization tier of a caller. Ordered from most to least privileged;
/// `NotApplicant` is the terminal deny tier resolved for unknown members and
/// corrupt grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum AccessMode {
    Full,
    Limited,
    Minimal,
    NotApplicant,
}

impl AccessMode {
    /// Storage code for the `members` partition (8-byte big-endian).
    pub fn code(self) -> u64 {
        match self {
            AccessMode::Full => 0,
            AccessMode::Limited => 1,
            AccessMode::Minimal => 2,
            AccessMode::NotApplicant => u64::MAX,
        }
    }

    /// Decode a stored grant. Anything outside the valid enumeration resolves
    /// to `NotApplicant` rather than a decode error.
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => AccessMode::Full,
            1 => AccessMode::Limited,
            2 => AccessMode::Minimal,
            _ => AccessMode::NotApplicant,
        }
    }
}

impl From<i64> for AccessMode {
    fn from(value: i64) -> Self {
        match value {
            0 => AccessMode::Full,
            1 => AccessMode::Limited,
            2 => AccessMode::Minimal,
            _ => AccessMode::NotApplicant,
        }
    }
}

impl From<AccessMode> for i64 {
    fn from(mode: AccessMode) -> Self {
        match mode {
            AccessMode::Full => 0,
            AccessMode::Limited => 1,
            AccessMode::Minimal => 2,
            AccessMode::NotApplicant => -1,
        }
    }
}

/// Immutable allow/deny tables for the command channel.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    commands: BTreeMap<AccessMode, BTreeSet<String>>,
    ledger_rpcs: BTreeMap<AccessMode, BTreeSet<String>>,
}

impl AccessPolicy {
    pub fn new(
        commands: BTreeMap<AccessMode, BTreeSet<String>>,
        ledger_rpcs: BTreeMap<AccessMode, BTreeSet<String>>,
    ) -> Self {
        Self {
            commands,
            ledger_rpcs,
        }
    }

    /// Whether `mode` may invoke the top-level `command`.
    pub fn allows_command(&self, command: &str, mode: AccessMode) -> bool {
        self.commands
            .get(&mode)
            .is_some_and(|set| set.contains(command))
    }

    /// Whether `mode` may forward `method` through the ledger passthrough.
    /// `NotApplicant` denies every wrapped operation unconditionally.
    pub fn allows_ledger_rpc(&self, method: &str, mode: AccessMode) -> bool {
        if mode == AccessMode::NotApplicant {
            return false;
        }
        self.ledger_rpcs
            .get(&mode)
            .is_some_and(|set| set.contains(method))
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        let full_commands = [
            "bind",
            "bind_ack",
            "bitcoind",
            "create_wallet",
            "finish_psbt",
            "set_member",
            "remove_member",
            "start_bitcoind",
            "stop_bitcoind",
            "get_bitcoind_status",
        ];
        let restricted_commands = ["bind", "bind_ack", "bitcoind", "get_bitcoind_status"];

        let full_rpcs = [
            "getbalances",
            "getblockchaininfo",
            "getmininginfo",
            "getnettotals",
            "getnetworkinfo",
            "getnewaddress",
            "getreceivedbyaddress",
            "gettransaction",
            "getwalletinfo",
            "listtransactions",
            "walletcreatefundedpsbt",
        ];

        let to_set = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();

        let mut commands = BTreeMap::new();
        commands.insert(AccessMode::Full, to_set(&full_commands));
        commands.insert(AccessMode::Limited, to_set(&restricted_commands));
        commands.insert(AccessMode::Minimal, to_set(&restricted_commands));

        let mut ledger_rpcs = BTreeMap::new();
        ledger_rpcs.insert(AccessMode::Full, to_set(&full_rpcs));
        ledger_rpcs.insert(AccessMode::Limited, BTreeSet::new());
        ledger_rpcs.insert(AccessMode::Minimal, BTreeSet::new());

        Self::new(commands, ledger_rpcs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_allow_list_membership() {
        let policy = AccessPolicy::default();

        assert!(policy.allows_command("bitcoind", AccessMode::Minimal));
        assert!(policy.allows_command("bind", AccessMode::Limited));
        assert!(policy.allows_command("set_member", AccessMode::Full));

        assert!(!policy.allows_command("set_member", AccessMode::Limited));
        assert!(!policy.allows_command("create_wallet", AccessMode::Minimal));
        assert!(!policy.allows_command("bitcoind", AccessMode::NotApplicant));
        assert!(!policy.allows_command("unknown", AccessMode::Full));
    }

    #[test]
    fn ledger_rpc_allow_list_membership() {
        let policy = AccessPolicy::default();

        assert!(policy.allows_ledger_rpc("getbalances", AccessMode::Full));
        assert!(policy.allows_ledger_rpc("walletcreatefundedpsbt", AccessMode::Full));

        assert!(!policy.allows_ledger_rpc("sendrawtransaction", AccessMode::Full));
        assert!(!policy.allows_ledger_rpc("getbalances", AccessMode::Limited));
        assert!(!policy.allows_ledger_rpc("getbalances", AccessMode::Minimal));
        assert!(!policy.allows_ledger_rpc("getbalances", AccessMode::NotApplicant));
    }

    #[test]
    fn access_mode_codes_round_trip() {
        for mode in [AccessMode::Full, AccessMode::Limited, AccessMode::Minimal] {
            assert_eq!(AccessMode::from_code(mode.code()), mode);
        }
        assert_eq!(AccessMode::from_code(10), AccessMode::NotApplicant);
        assert_eq!(AccessMode::from_code(u64::MAX), AccessMode::NotApplicant);
    }

    #[test]
    fn access_mode_orders_by_privilege() {
        assert!(AccessMode::Full < AccessMode::Limited);
        assert!(AccessMode::Limited < AccessMode::Minimal);
        assert!(AccessMode::Minimal < AccessMode::NotApplicant);
    }

    #[test]
    fn access_mode_deserializes_from_wire_integers() {
        assert_eq!(
            serde_json::from_str::<AccessMode>("1").unwrap(),
            AccessMode::Limited
        );
        assert_eq!(
            serde_json::from_str::<AccessMode>("-1").unwrap(),
            AccessMode::NotApplicant
        );
        assert_eq!(
            serde_json::from_str::<AccessMode>("42").unwrap(),
            AccessMode::NotApplicant
        );
    }
}
