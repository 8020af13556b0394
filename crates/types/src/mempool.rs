//! The node's view of transactions.

use crate::{Amount, Nonce, PublicKey, TxHash};
use serde::{Deserialize, Serialize};

/// A transaction as reported by the node's pending or included sets.
///
/// The node may report third-party traffic, so nothing here implies the
/// transaction was sent by this harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MempoolTransaction {
    pub hash: TxHash,
    pub sender: PublicKey,
    pub receiver: PublicKey,
    pub amount: Amount,
    pub fee: Amount,
    pub nonce: Nonce,
    #[serde(default)]
    pub memo: Option<String>,
}
