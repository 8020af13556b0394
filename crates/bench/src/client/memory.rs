//! In-process node with fault injection.

use super::{AccountState, NodeClient, NodeError, SubmitError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use txbench_types::{Amount, MempoolTransaction, Nonce, PublicKey, SignedTransaction, TxHash};

#[derive(Default)]
struct NodeState {
    accounts: HashMap<PublicKey, AccountState>,
    pending: Vec<MempoolTransaction>,
    included: Vec<MempoolTransaction>,
    failing: HashSet<(PublicKey, Nonce)>,
    stalled: HashSet<(PublicKey, Nonce)>,
}

/// A node that keeps its mempool and chain in memory.
///
/// Submissions land in the pending set; [`MemoryNode::produce_block`] moves
/// sequence-ordered pending transactions into the included set. Faults are
/// injected per `(sender, nonce)`.
#[derive(Default)]
pub struct MemoryNode {
    state: Mutex<NodeState>,
    submissions: AtomicU64,
    submit_delay: Option<Duration>,
}

impl MemoryNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every submission by `delay` before it is processed.
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    /// Create or overwrite an account.
    pub fn set_account(&self, public_key: PublicKey, balance: Amount, nonce: Nonce) {
        self.state
            .lock()
            .accounts
            .insert(public_key, AccountState { balance, nonce });
    }

    /// Fail the submission of `(sender, nonce)` with a transport error.
    pub fn fail_nonce(&self, sender: &PublicKey, nonce: Nonce) {
        self.state.lock().failing.insert((sender.clone(), nonce));
    }

    /// Never answer the submission of `(sender, nonce)`.
    pub fn stall_nonce(&self, sender: &PublicKey, nonce: Nonce) {
        self.state.lock().stalled.insert((sender.clone(), nonce));
    }

    /// Put a transaction that did not come from the harness into the mempool.
    pub fn add_third_party(&self, tx: MempoolTransaction) {
        self.state.lock().pending.push(tx);
    }

    /// Evict a pending transaction without including it.
    pub fn drop_pending(&self, hash: &TxHash) -> bool {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|tx| &tx.hash != hash);
        state.pending.len() != before
    }

    /// Number of submission attempts received so far.
    pub fn submission_count(&self) -> u64 {
        self.submissions.load(Ordering::SeqCst)
    }

    /// Include every pending transaction whose nonce continues its sender's
    /// sequence. Returns the number of included transactions.
    pub fn produce_block(&self) -> usize {
        let mut state = self.state.lock();
        let NodeState {
            accounts,
            pending,
            included,
            ..
        } = &mut *state;

        pending.sort_by_key(|tx| tx.nonce);
        let mut count = 0;
        let mut remaining = Vec::with_capacity(pending.len());

        for tx in pending.drain(..) {
            let Some(sender) = accounts.get_mut(&tx.sender) else {
                // Third-party traffic from accounts the node does not track.
                included.push(tx);
                count += 1;
                continue;
            };
            if tx.nonce != sender.nonce {
                remaining.push(tx);
                continue;
            }

            let cost = tx.amount.checked_add(tx.fee).unwrap_or(Amount(u64::MAX));
            sender.balance = sender.balance.saturating_sub(cost);
            sender.nonce += 1;
            if let Some(receiver) = accounts.get_mut(&tx.receiver) {
                receiver.balance = receiver.balance.checked_add(tx.amount).unwrap_or(receiver.balance);
            }
            included.push(tx);
            count += 1;
        }

        *pending = remaining;
        if count > 0 {
            debug!(count, pending = pending.len(), "Produced block");
        }
        count
    }

    /// Produce a block every `interval` until `cancel` fires.
    pub fn spawn_block_producer(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let node = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        node.produce_block();
                    }
                }
            }
        })
    }

    fn accept(&self, tx: &SignedTransaction) -> Result<TxHash, SubmitError> {
        let intent = &tx.intent;
        let key = (intent.sender.clone(), intent.nonce);
        let mut state = self.state.lock();

        if state.failing.contains(&key) {
            return Err(SubmitError::Transport("connection reset".to_string()));
        }

        let Some(account) = state.accounts.get(&intent.sender) else {
            return Err(SubmitError::Rejected(format!(
                "unknown account {}",
                intent.sender
            )));
        };
        if intent.nonce < account.nonce {
            return Err(SubmitError::StaleSequence {
                expected: Some(account.nonce),
                got: intent.nonce,
            });
        }

        let duplicate = state
            .pending
            .iter()
            .any(|p| p.hash == tx.hash || (p.sender == intent.sender && p.nonce == intent.nonce));
        if duplicate {
            return Err(SubmitError::Rejected("duplicate transaction".to_string()));
        }

        state.pending.push(MempoolTransaction {
            hash: tx.hash.clone(),
            sender: intent.sender.clone(),
            receiver: intent.receiver.clone(),
            amount: intent.amount,
            fee: intent.fee,
            nonce: intent.nonce,
            memo: intent.memo.clone(),
        });
        Ok(tx.hash.clone())
    }
}

#[async_trait]
impl NodeClient for MemoryNode {
    async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, SubmitError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }

        let stalled = self
            .state
            .lock()
            .stalled
            .contains(&(tx.intent.sender.clone(), tx.intent.nonce));
        if stalled {
            trace!(nonce = tx.intent.nonce, "Stalling submission");
            std::future::pending::<()>().await;
        }

        self.accept(tx)
    }

    async fn pending_transactions(&self) -> Result<Vec<MempoolTransaction>, NodeError> {
        Ok(self.state.lock().pending.clone())
    }

    async fn included_transactions(&self) -> Result<Vec<MempoolTransaction>, NodeError> {
        Ok(self.state.lock().included.clone())
    }

    async fn account(&self, public_key: &PublicKey) -> Result<AccountState, NodeError> {
        self.state
            .lock()
            .accounts
            .get(public_key)
            .copied()
            .ok_or_else(|| NodeError::UnknownAccount(public_key.clone()))
    }
}
