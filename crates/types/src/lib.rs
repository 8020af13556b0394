//! Core types for the txbench mempool benchmark harness.
//!
//! This crate provides the foundational types shared by the benchmark
//! components:
//!
//! - **Primitives**: keys, token amounts, transaction hashes
//! - **Wallets**: benchmark wallet records as exchanged with the UI layer
//! - **Transactions**: intents, signed transactions, tracked (sent) transactions
//!   and their status state machine
//! - **Mempool**: the node's view of pending and included transactions
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend on
//! any other workspace crates, making it the foundation layer.

mod amount;
mod hash;
mod keys;
mod mempool;
mod signing;
mod transaction;
mod wallet;

pub use amount::{Amount, ParseAmountError, NANO_PER_TOKEN};
pub use hash::TxHash;
pub use keys::{PrivateKey, PublicKey};
pub use mempool::MempoolTransaction;
pub use signing::{payment_message, DOMAIN_PAYMENT};
pub use transaction::{
    unix_millis, FailureReason, InvalidTransition, SentTransaction, SignedTransaction,
    TransactionIntent, TxStatus,
};
pub use wallet::{Wallet, WalletRecord};

/// Per-wallet sequence number (nonce).
pub type Nonce = u64;

/// Identifier of a composed batch, unique within a session.
pub type BatchId = u64;
