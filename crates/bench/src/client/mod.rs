//! Node client seam.
//!
//! The harness talks to the node only through [`NodeClient`]. Two
//! implementations ship with the crate:
//!
//! - [`HttpNodeClient`]: JSON over HTTP against a node's RPC API
//! - [`MemoryNode`]: an in-process node with fault injection, used by tests and
//!   by the CLI's simulate mode

mod http;
mod memory;
mod types;

pub use http::HttpNodeClient;
pub use memory::MemoryNode;
pub use types::{AccountResponse, SubmitTransactionRequest, SubmitTransactionResponse};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use txbench_types::{
    Amount, FailureReason, MempoolTransaction, Nonce, PublicKey, SignedTransaction, TxHash,
};

/// On-chain balance and sequence number of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: Amount,
    /// Next sequence number the chain expects from this account.
    pub nonce: Nonce,
}

/// Errors returned by transaction submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Stale sequence number {got} (node expects {expected:?})")]
    StaleSequence { expected: Option<Nonce>, got: Nonce },

    #[error("Rejected by node: {0}")]
    Rejected(String),
}

impl From<SubmitError> for FailureReason {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Transport(e) => FailureReason::Transport(e),
            SubmitError::StaleSequence { expected, got } => {
                FailureReason::StaleSequence { expected, got }
            }
            SubmitError::Rejected(e) => FailureReason::Rejected(e),
        }
    }
}

/// Errors returned by node queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(PublicKey),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Operations the harness needs from a node.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Submit a signed transaction, returning the node's hash for it.
    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, SubmitError>;

    /// Transactions currently in the node's mempool.
    async fn pending_transactions(&self) -> Result<Vec<MempoolTransaction>, NodeError>;

    /// Transactions the node has included in blocks.
    async fn included_transactions(&self) -> Result<Vec<MempoolTransaction>, NodeError>;

    /// Balance and next expected sequence number of an account.
    async fn account(&self, public_key: &PublicKey) -> Result<AccountState, NodeError>;

    /// Whether the node is reachable and ready to accept transactions.
    async fn is_ready(&self) -> bool {
        true
    }
}
