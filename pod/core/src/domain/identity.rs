// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Pod Identity
//!
//! Every party on the channel (the pod itself, the owner device, invited
//! members) is addressed by a `did:key` identifier derived from an Ed25519
//! public key. The identifier is self-certifying: holding a DID is enough to
//! verify any signature its owner produced, no registry lookup required.
//!
//! ## Encoding
//!
//! `did:key:z` ++ base58btc(multicodec varint `0xed01` ++ 32-byte public key)
//!
//! Signatures exchanged over the wire (binding handshake, relay
//! authentication) are hex-encoded Ed25519 over the UTF-8 message bytes.

use std::fmt;
use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

const DID_KEY_PREFIX: &str = "did:key:z";

/// Multicodec varint for an Ed25519 public key, per the did:key spec.
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid did: {0}")]
    InvalidDid(String),

    #[error("identity key file is malformed: {0}")]
    MalformedKeyFile(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Self-certifying identifier of one device on the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the DID for an Ed25519 public key.
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let mut raw = Vec::with_capacity(ED25519_MULTICODEC.len() + 32);
        raw.extend_from_slice(&ED25519_MULTICODEC);
        raw.extend_from_slice(key.as_bytes());
        Self(format!("{}{}", DID_KEY_PREFIX, bs58::encode(raw).into_string()))
    }

    /// Recover the public key this DID certifies.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidDid`] when the prefix, multicodec tag,
    /// or key length do not match an Ed25519 did:key.
    pub fn verifying_key(&self) -> Result<VerifyingKey, IdentityError> {
        let encoded = self
            .0
            .strip_prefix(DID_KEY_PREFIX)
            .ok_or_else(|| IdentityError::InvalidDid(self.0.clone()))?;

        let raw = bs58::decode(encoded)
            .into_vec()
            .map_err(|_| IdentityError::InvalidDid(self.0.clone()))?;

        let key_bytes = raw
            .strip_prefix(&ED25519_MULTICODEC[..])
            .ok_or_else(|| IdentityError::InvalidDid(self.0.clone()))?;

        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidDid(self.0.clone()))?;

        VerifyingKey::from_bytes(&key_bytes).map_err(|_| IdentityError::InvalidDid(self.0.clone()))
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate the hex signature of `message` against the key certified by `did`.
///
/// Any malformed input (bad DID, bad hex, wrong signature length) counts as a
/// failed verification rather than an error; callers only branch on the
/// boolean.
pub fn verify_signature(did: &Did, message: &str, signature_hex: &str) -> bool {
    let Ok(key) = did.verifying_key() else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&sig_bytes) else {
        return false;
    };
    key.verify(message.as_bytes(), &signature).is_ok()
}

/// On-disk form of the pod's private key.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    private_key: String,
}

/// The pod's own signing identity.
pub struct PodIdentity {
    signing_key: SigningKey,
    did: Did,
}

impl PodIdentity {
    /// Generate a fresh identity from the OS entropy source.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let did = Did::from_verifying_key(&signing_key.verifying_key());
        Self { signing_key, did }
    }

    pub fn did(&self) -> &Did {
        &self.did
    }

    /// Sign a UTF-8 message, returning the hex-encoded signature.
    pub fn sign(&self, message: &str) -> String {
        hex::encode(self.signing_key.sign(message.as_bytes()).to_bytes())
    }

    /// Sign raw bytes, returning the raw 64-byte signature.
    pub fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }

    /// Load the identity from `path`, or generate and persist a new one.
    ///
    /// Returns the identity and whether it was freshly created. The key file
    /// is written before the identity is handed out, so a crash can never
    /// leave the pod advertising a DID it cannot sign for.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), IdentityError> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }

        let identity = Self::generate();
        identity.save(path)?;
        Ok((identity, true))
    }

    fn load(path: &Path) -> Result<Self, IdentityError> {
        let raw = std::fs::read_to_string(path)?;
        let key_file: KeyFile = serde_json::from_str(&raw)
            .map_err(|e| IdentityError::MalformedKeyFile(e.to_string()))?;

        let key_bytes = hex::decode(&key_file.private_key)
            .map_err(|e| IdentityError::MalformedKeyFile(e.to_string()))?;
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| IdentityError::MalformedKeyFile("bad private key length".into()))?;

        Ok(Self::from_signing_key(SigningKey::from_bytes(&key_bytes)))
    }

    fn save(&self, path: &Path) -> Result<(), IdentityError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let key_file = KeyFile {
            private_key: hex::encode(self.signing_key.to_bytes()),
        };
        let raw = serde_json::to_string(&key_file)
            .map_err(|e| IdentityError::MalformedKeyFile(e.to_string()))?;
        std::fs::write(path, raw)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn did_round_trips_through_verifying_key() {
        let identity = PodIdentity::generate();
        let key = identity.did().verifying_key().unwrap();
        assert_eq!(Did::from_verifying_key(&key), *identity.did());
        assert!(identity.did().as_str().starts_with("did:key:z"));
    }

    #[test]
    fn signature_verifies_against_own_did() {
        let identity = PodIdentity::generate();
        let signature = identity.sign("ab12cd341618456405107");

        assert!(verify_signature(
            identity.did(),
            "ab12cd341618456405107",
            &signature
        ));
        assert!(!verify_signature(
            identity.did(),
            "ab12cd341618456405108",
            &signature
        ));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let identity = PodIdentity::generate();
        let other = PodIdentity::generate();
        let signature = other.sign("message");

        assert!(!verify_signature(identity.did(), "message", &signature));
    }

    #[test]
    fn malformed_inputs_fail_closed() {
        let identity = PodIdentity::generate();
        assert!(!verify_signature(identity.did(), "message", "not-hex"));
        assert!(!verify_signature(
            &Did::new("did:key:zInvalid"),
            "message",
            &identity.sign("message")
        ));
    }

    #[test]
    fn load_or_create_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");

        let (first, created) = PodIdentity::load_or_create(&path).unwrap();
        assert!(created);

        let (second, created) = PodIdentity::load_or_create(&path).unwrap();
        assert!(!created);
        assert_eq!(first.did(), second.did());
    }
}
