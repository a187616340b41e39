// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! On-disk pod configuration (YAML).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodConfig {
    /// DID of the single identity allowed to pair with this pod.
    pub owner_did: String,

    /// DID of the pod to talk to, for the pairing-client subcommands.
    #[serde(default)]
    pub pod_did: Option<String>,

    /// Directory all pod state files live under.
    pub data_dir: PathBuf,

    /// Identity key file name, relative to `data_dir`.
    #[serde(default = "default_identity_file")]
    pub identity_file: String,

    /// Embedded database name, relative to `data_dir`.
    #[serde(default = "default_db_file")]
    pub db_file: String,

    pub relay: RelayConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HTTP endpoint of the directory/relay service.
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: String,
    #[serde(default)]
    pub rpc_password: String,
    /// Endpoint of the node supervisor (`/start`, `/stop`, `/status`).
    #[serde(default)]
    pub control_url: String,
}

fn default_identity_file() -> String {
    "pod_identity.json".into()
}

fn default_db_file() -> String {
    "pod.db".into()
}

impl PodConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let config: PodConfig = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("cannot parse config {}: {e}", path.display()))?;
        Ok(config)
    }

    /// Absolute path of a state file under the data directory.
    pub fn data_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    pub fn identity_path(&self) -> PathBuf {
        self.data_path(&self.identity_file)
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_path(&self.db_file)
    }
}
