//! Benchmark wallet records exchanged with the UI layer.

use crate::{Amount, Nonce, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};

/// Wallet fields delivered on the initial bulk load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
    #[serde(rename = "minaTokens")]
    pub balance: Amount,
    pub nonce: Nonce,
}

/// A point-in-time snapshot of a benchmark wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
    #[serde(rename = "minaTokens")]
    pub balance: Amount,
    /// Next sequence number this harness will assign.
    pub nonce: Nonce,
    /// Whether this is the currently selected wallet.
    pub selected: bool,
}

impl Wallet {
    /// Drop the UI-only fields.
    pub fn record(&self) -> WalletRecord {
        WalletRecord {
            public_key: self.public_key.clone(),
            private_key: self.private_key.clone(),
            balance: self.balance,
            nonce: self.nonce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uses_ui_field_names() {
        let record = WalletRecord {
            public_key: PublicKey::new("B62q"),
            private_key: PrivateKey::new("EKE"),
            balance: Amount::from_nano(5),
            nonce: 2,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["publicKey"], "B62q");
        assert_eq!(json["privateKey"], "EKE");
        assert_eq!(json["minaTokens"], 5);
        assert_eq!(json["nonce"], 2);
    }
}
