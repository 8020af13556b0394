//! Types for RPC client communication.

use super::SubmitError;
use serde::{Deserialize, Serialize};
use txbench_types::{Amount, Nonce, SignedTransaction, TxHash};

/// Request to submit a transaction.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTransactionRequest {
    pub transaction: SignedTransaction,
}

/// Response from transaction submission.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTransactionResponse {
    pub accepted: bool,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Set by the node when the rejection was caused by a sequence mismatch.
    #[serde(default)]
    pub expected_nonce: Option<Nonce>,
}

impl SubmitTransactionResponse {
    /// Classify the response for a transaction that carried `sent_nonce`.
    ///
    /// Accepted responses without a hash fall back to the signer's hash.
    pub fn into_result(
        self,
        sent_nonce: Nonce,
        signer_hash: &TxHash,
    ) -> Result<TxHash, SubmitError> {
        if self.accepted {
            return Ok(self.hash.map(TxHash::new).unwrap_or_else(|| signer_hash.clone()));
        }

        match self.expected_nonce {
            Some(expected) if expected != sent_nonce => Err(SubmitError::StaleSequence {
                expected: Some(expected),
                got: sent_nonce,
            }),
            _ => Err(SubmitError::Rejected(
                self.error.unwrap_or_else(|| "no reason given".to_string()),
            )),
        }
    }
}

/// Response from the account endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountResponse {
    pub balance: Amount,
    pub nonce: Nonce,
}
