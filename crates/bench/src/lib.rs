//! txbench mempool benchmark harness
//!
//! A library and CLI tool for composing, signing and submitting batches of
//! payment transactions to a node, then reconciling what the harness sent
//! against the node's mempool and chain.
//!
//! # Modules
//!
//! - [`accounts`]: Wallet registry (BenchWallet, WalletRegistry)
//! - [`workloads`]: Batch composition (BatchComposer)
//! - [`dispatch`]: Signing and bounded-concurrency submission (DispatchPipeline)
//! - [`reconcile`]: Mempool reconciliation and inclusion latency (Reconciler)
//! - [`session`]: Command/event session controller
//! - [`client`]: Node client trait, HTTP client and in-memory node
//! - [`keystore`]: Wallet key sources
//! - [`signer`]: Transaction signing
//! - [`config`]: Configuration types
//! - [`stats`]: Run counters and the end-of-run report

pub mod accounts;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod keystore;
pub mod reconcile;
pub mod session;
pub mod signer;
pub mod stats;
pub mod workloads;

pub use accounts::{BenchWallet, RegistryError, WalletRegistry, WalletUsageStats};
pub use client::{AccountState, HttpNodeClient, MemoryNode, NodeClient, NodeError, SubmitError};
pub use config::{BenchConfig, ConfigError};
pub use dispatch::{BatchError, BatchSummary, DispatchPipeline};
pub use keystore::{JsonKeyStore, KeyStore, KeyStoreError, StaticKeyStore};
pub use reconcile::{Anomaly, LatencyReport, Reconciler, ReconciliationReport};
pub use session::{Command, Event, Session, SessionHandle, SessionOptions, SessionParts};
pub use signer::{DigestSigner, Signer, SigningError};
pub use stats::{BenchReport, BenchStats};
pub use workloads::{BatchComposer, ComposeError};
