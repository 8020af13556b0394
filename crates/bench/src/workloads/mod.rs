//! Batch composition.
//!
//! Turns the current session settings into a batch of unsigned intents. Every
//! intent takes the next sequence number of its sender at composition time, so
//! numbers handed out to a batch are never reused, even if its submissions
//! later fail.

use crate::accounts::{BenchWallet, WalletRegistry};
use crate::session::SessionConfig;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use txbench_types::{unix_millis, BatchId, PublicKey, TransactionIntent};

/// Errors that can occur while composing a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    #[error("No eligible wallet to send from")]
    InsufficientWallets,

    #[error("Invalid batch size {0}")]
    InvalidBatchSize(usize),
}

/// Builds batches of transaction intents from the wallet registry.
#[derive(Debug, Default)]
pub struct BatchComposer {
    next_batch: AtomicU64,
}

impl BatchComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose `config.batch_size` intents.
    ///
    /// With random selection enabled on the registry each intent picks an
    /// independent, uniformly random funded wallet. Otherwise every intent
    /// comes from the selected wallet, which must be funded.
    pub fn compose<R: Rng + ?Sized>(
        &self,
        config: &SessionConfig,
        registry: &WalletRegistry,
        rng: &mut R,
    ) -> Result<(BatchId, Vec<TransactionIntent>), ComposeError> {
        if config.batch_size == 0 {
            return Err(ComposeError::InvalidBatchSize(config.batch_size));
        }

        let random = registry.is_random_selection();
        let senders: Vec<Arc<BenchWallet>> = if random {
            registry.eligible()
        } else {
            registry.selected().filter(|w| w.is_funded()).into_iter().collect()
        };
        if senders.is_empty() {
            return Err(ComposeError::InsufficientWallets);
        }

        let order = registry.wallets();
        let batch = self.next_batch.fetch_add(1, Ordering::SeqCst);
        let created_at_ms = unix_millis();

        let intents: Vec<TransactionIntent> = (0..config.batch_size)
            .map(|index| {
                let sender = &senders[rng.gen_range(0..senders.len())];
                sender.record_selection();
                TransactionIntent {
                    batch,
                    sender: sender.public_key().clone(),
                    receiver: recipient_for(config, &order, sender.public_key()),
                    amount: config.amount,
                    fee: config.fee,
                    nonce: sender.next_nonce(),
                    memo: Some(format!("txbench:{batch}:{index}")),
                    created_at_ms,
                }
            })
            .collect();

        debug!(batch, size = intents.len(), random, "Composed batch");
        Ok((batch, intents))
    }
}

/// The configured recipient, or the wallet after `sender` in registry order.
fn recipient_for(config: &SessionConfig, order: &[Arc<BenchWallet>], sender: &PublicKey) -> PublicKey {
    if let Some(recipient) = &config.recipient {
        return recipient.clone();
    }
    let position = order
        .iter()
        .position(|w| w.public_key() == sender)
        .unwrap_or(0);
    order
        .get((position + 1) % order.len().max(1))
        .map(|w| w.public_key().clone())
        .unwrap_or_else(|| sender.clone())
}
