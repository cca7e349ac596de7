//! Key Vault
//!
//! Resolves an owner key to a signer. Material is read and decoded on
//! demand, used for a single call, and dropped with the returned signer;
//! nothing in the engine caches signing keys.
//!
//! Author: AI-Generated
//! Created: 2026-02-04

use crate::errors::{EngineError, EngineResult};
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

#[async_trait]
pub trait KeyVault: Send + Sync {
    /// Signer for the given owner. Valid for the duration of one call.
    async fn signer_for(&self, owner_key: &str) -> EngineResult<PrivateKeySigner>;

    /// Signing address without keeping the signer around.
    async fn address_for(&self, owner_key: &str) -> EngineResult<Address> {
        Ok(self.signer_for(owner_key).await?.address())
    }
}

/// JSON key file: `{ "owner-key": "0x<hex private key>", ... }`.
/// Re-read on every lookup so rotations take effect without a restart.
pub struct FileKeyVault {
    path: PathBuf,
}

impl FileKeyVault {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl KeyVault for FileKeyVault {
    async fn signer_for(&self, owner_key: &str) -> EngineResult<PrivateKeySigner> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| EngineError::Upstream(format!("key file unreadable: {e}")))?;
        let keys: HashMap<String, String> = serde_json::from_str(&raw)
            .map_err(|e| EngineError::Upstream(format!("key file malformed: {e}")))?;

        let hex = keys.get(owner_key).ok_or(EngineError::NotFound)?;
        PrivateKeySigner::from_str(hex.trim())
            .map_err(|_| EngineError::InvalidArgument(format!("malformed signing key for {owner_key}")))
    }
}

/// In-memory vault for tests.
#[cfg(test)]
pub struct StaticKeyVault {
    keys: HashMap<String, String>,
}

#[cfg(test)]
impl StaticKeyVault {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            keys: entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl KeyVault for StaticKeyVault {
    async fn signer_for(&self, owner_key: &str) -> EngineResult<PrivateKeySigner> {
        let hex = self.keys.get(owner_key).ok_or(EngineError::NotFound)?;
        PrivateKeySigner::from_str(hex)
            .map_err(|_| EngineError::InvalidArgument(format!("malformed signing key for {owner_key}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A well-known throwaway test key (hardhat account #0).
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[tokio::test]
    async fn test_static_vault_resolves_address() {
        let vault = StaticKeyVault::new(&[("alice", TEST_KEY)]);
        let addr = vault.address_for("alice").await.unwrap();
        assert_eq!(
            format!("{addr:?}").to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
    }

    #[tokio::test]
    async fn test_unknown_owner_is_not_found() {
        let vault = StaticKeyVault::new(&[("alice", TEST_KEY)]);
        assert_eq!(vault.signer_for("bob").await.unwrap_err(), EngineError::NotFound);
    }

    #[tokio::test]
    async fn test_malformed_key_is_invalid_argument() {
        let vault = StaticKeyVault::new(&[("alice", "0xnotakey")]);
        let err = vault.signer_for("alice").await.unwrap_err();
        assert_eq!(err.code(), "invalid_argument");
    }

    #[tokio::test]
    async fn test_file_vault_round_trip() {
        let dir = std::env::temp_dir().join(format!("dca-vault-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("keys.json");
        std::fs::write(&path, format!("{{\"alice\": \"{TEST_KEY}\"}}")).unwrap();

        let vault = FileKeyVault::new(path);
        assert!(vault.signer_for("alice").await.is_ok());
        assert_eq!(vault.signer_for("bob").await.unwrap_err(), EngineError::NotFound);
    }
}
