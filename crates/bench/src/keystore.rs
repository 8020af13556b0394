//! Sources of benchmark keypairs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use txbench_types::{PrivateKey, PublicKey};

/// Errors that can occur while reading keys.
#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse key file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Duplicate public key {0}")]
    Duplicate(PublicKey),
}

/// A keypair entry as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyEntry {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

/// Supplies the keypairs of the benchmark wallets.
#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn keys(&self) -> Result<Vec<(PublicKey, PrivateKey)>, KeyStoreError>;
}

/// Keys read from a JSON array of `{publicKey, privateKey}` objects.
#[derive(Debug, Clone)]
pub struct JsonKeyStore {
    path: PathBuf,
}

impl JsonKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl KeyStore for JsonKeyStore {
    async fn keys(&self) -> Result<Vec<(PublicKey, PrivateKey)>, KeyStoreError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| KeyStoreError::Io {
                    path: self.path.clone(),
                    source,
                })?;
        let entries: Vec<KeyEntry> =
            serde_json::from_str(&contents).map_err(|source| KeyStoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let mut seen = std::collections::HashSet::new();
        entries
            .into_iter()
            .map(|entry| {
                if !seen.insert(entry.public_key.clone()) {
                    return Err(KeyStoreError::Duplicate(entry.public_key));
                }
                Ok((entry.public_key, entry.private_key))
            })
            .collect()
    }
}

/// A fixed set of keys held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyStore {
    keys: Vec<(PublicKey, PrivateKey)>,
}

impl StaticKeyStore {
    pub fn new(keys: Vec<(PublicKey, PrivateKey)>) -> Self {
        Self { keys }
    }

    /// Deterministically derive `count` keypairs from `seed`.
    ///
    /// The same seed always yields the same keys, so simulated runs are
    /// reproducible.
    pub fn generate(count: usize, seed: u64) -> Self {
        let keys = (0..count as u64)
            .map(|i| {
                let private = blake3::hash(&[seed.to_le_bytes(), i.to_le_bytes()].concat());
                let public = blake3::hash(private.as_bytes());
                (
                    PublicKey::new(format!("B62q{}", &public.to_hex()[..51])),
                    PrivateKey::new(format!("EK{}", private.to_hex())),
                )
            })
            .collect();
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyStore for StaticKeyStore {
    async fn keys(&self) -> Result<Vec<(PublicKey, PrivateKey)>, KeyStoreError> {
        Ok(self.keys.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_json_keystore() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"publicKey":"B62qa","privateKey":"EKa"}},{{"publicKey":"B62qb","privateKey":"EKb"}}]"#
        )
        .unwrap();

        let keys = JsonKeyStore::new(file.path()).keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].0, PublicKey::new("B62qa"));
        assert_eq!(keys[1].1.expose(), "EKb");
    }

    #[tokio::test]
    async fn test_json_keystore_rejects_duplicates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"publicKey":"B62qa","privateKey":"EKa"}},{{"publicKey":"B62qa","privateKey":"EKb"}}]"#
        )
        .unwrap();

        let err = JsonKeyStore::new(file.path()).keys().await.unwrap_err();
        assert!(matches!(err, KeyStoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = JsonKeyStore::new("/nonexistent/keys.json")
            .keys()
            .await
            .unwrap_err();
        assert!(matches!(err, KeyStoreError::Io { .. }));
    }

    #[tokio::test]
    async fn test_generate_is_deterministic() {
        let a = StaticKeyStore::generate(4, 7).keys().await.unwrap();
        let b = StaticKeyStore::generate(4, 7).keys().await.unwrap();
        let c = StaticKeyStore::generate(4, 8).keys().await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let unique: std::collections::HashSet<_> = a.iter().map(|(pk, _)| pk.clone()).collect();
        assert_eq!(unique.len(), 4);
    }
}
