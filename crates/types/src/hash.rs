//! Transaction hash type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A transaction hash as reported by the node.
///
/// Nodes encode hashes in their own textual format, so the hash is kept as an
/// opaque string. Hashes produced locally by the digest signer are Blake3
/// digests encoded as lowercase hex.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    /// Wrap a node-provided hash string.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Hash multiple byte slices with Blake3 and hex-encode the digest.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hex::encode(hasher.finalize().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Node-supplied hashes are arbitrary text; cut on char boundaries.
        let chars = self.0.chars().count();
        if chars > 16 {
            let head = self.0.char_indices().nth(8).map_or(0, |(i, _)| i);
            let tail = self.0.char_indices().nth(chars - 8).map_or(0, |(i, _)| i);
            write!(f, "TxHash({}..{})", &self.0[..head], &self.0[tail..])
        } else {
            write!(f, "TxHash({})", self.0)
        }
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let hash1 = TxHash::from_parts(&[b"hello", b"world"]);
        let hash2 = TxHash::from_parts(&[b"hello", b"world"]);
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.as_str().len(), 64);
    }

    #[test]
    fn test_hash_part_order_matters() {
        let ab = TxHash::from_parts(&[b"a", b"b"]);
        let ba = TxHash::from_parts(&[b"b", b"a"]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_debug_shortens_long_hashes() {
        let hash = TxHash::from_parts(&[b"x"]);
        let debug = format!("{:?}", hash);
        assert!(debug.starts_with("TxHash("));
        assert!(debug.contains(".."));
        assert_eq!(format!("{:?}", TxHash::new("abc")), "TxHash(abc)");
    }

    #[test]
    fn test_debug_handles_multibyte_text() {
        assert_eq!(format!("{:?}", TxHash::new("aéééééééé")), "TxHash(aéééééééé)");
        assert_eq!(
            format!("{:?}", TxHash::new("aéééééééébcdeééééééé")),
            "TxHash(aééééééé..eééééééé)"
        );
    }
}
