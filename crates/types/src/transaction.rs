//! Transaction intents, signed transactions and their tracked status.
//!
//! # Status State Machine
//!
//! ```text
//!   Submitted ──► Accepted ──► Confirmed
//!       │            │
//!       │            └──────► Failed(Timeout)
//!       │
//!       └──► Failed(Transport | StaleSequence | Rejected | Signing | Cancelled)
//! ```
//!
//! `Submitted -> Accepted/Failed` is decided by the dispatch pipeline.
//! `Accepted -> Confirmed/Failed(Timeout)` is decided by the reconciler.

use crate::{Amount, BatchId, Nonce, PublicKey, TxHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, saturating to 0 on a pre-epoch clock.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// An unsigned payment composed for a batch.
///
/// The sequence number is assigned at composition time and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionIntent {
    /// Batch this intent was composed in.
    pub batch: BatchId,
    pub sender: PublicKey,
    pub receiver: PublicKey,
    pub amount: Amount,
    pub fee: Amount,
    pub nonce: Nonce,
    #[serde(default)]
    pub memo: Option<String>,
    /// Composition time (unix millis).
    pub created_at_ms: u64,
}

/// An intent together with its signature and the hash the signer derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub intent: TransactionIntent,
    /// Scheme-specific signature encoding.
    pub signature: String,
    pub hash: TxHash,
}

/// Why a transaction failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum FailureReason {
    /// Submission failed at the network layer.
    Transport(String),
    /// The node rejected the sequence number.
    StaleSequence { expected: Option<Nonce>, got: Nonce },
    /// The node rejected the transaction for another reason.
    Rejected(String),
    /// The signer refused the intent.
    Signing(String),
    /// Accepted, but neither pending nor included after the confirmation deadline.
    Timeout,
    /// The session closed before the submission finished.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::StaleSequence {
                expected: Some(expected),
                got,
            } => write!(f, "stale sequence: expected {expected}, got {got}"),
            Self::StaleSequence { expected: None, got } => {
                write!(f, "stale sequence: nonce {got} rejected")
            }
            Self::Rejected(e) => write!(f, "rejected: {e}"),
            Self::Signing(e) => write!(f, "signing: {e}"),
            Self::Timeout => f.write_str("timeout"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Lifecycle status of a sent transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum TxStatus {
    Submitted,
    Accepted,
    Confirmed,
    Failed(FailureReason),
}

impl TxStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed(_))
    }

    /// Whether the submission stage is over (accepted or terminal).
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Submitted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Check whether `next` is a legal successor of this status.
    pub fn can_transition_to(&self, next: &TxStatus) -> bool {
        match (self, next) {
            (Self::Submitted, Self::Accepted) => true,
            (Self::Submitted, Self::Failed(reason)) => *reason != FailureReason::Timeout,
            (Self::Accepted, Self::Confirmed) => true,
            (Self::Accepted, Self::Failed(FailureReason::Timeout)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submitted => f.write_str("submitted"),
            Self::Accepted => f.write_str("accepted"),
            Self::Confirmed => f.write_str("confirmed"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// Rejected status transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: TxStatus,
    pub to: TxStatus,
}

/// A transaction tracked from submission to a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentTransaction {
    pub intent: TransactionIntent,
    pub status: TxStatus,
    /// Known once the transaction is signed.
    pub hash: Option<TxHash>,
}

impl SentTransaction {
    /// A freshly signed transaction about to be submitted.
    pub fn submitted(signed: &SignedTransaction) -> Self {
        Self {
            intent: signed.intent.clone(),
            status: TxStatus::Submitted,
            hash: Some(signed.hash.clone()),
        }
    }

    /// An intent that never reached submission (e.g. signing failed).
    pub fn failed_before_submission(intent: TransactionIntent, reason: FailureReason) -> Self {
        Self {
            intent,
            status: TxStatus::Failed(reason),
            hash: None,
        }
    }

    /// Move to `next`, enforcing the status state machine.
    pub fn transition(&mut self, next: TxStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(&next) {
            return Err(InvalidTransition {
                from: self.status.clone(),
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
