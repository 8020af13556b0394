//! Batch dispatch.
//!
//! Signs a composed batch and submits it concurrently, capped at
//! `max_in_flight` outstanding submissions. Each submission settles as
//! `Accepted` or `Failed(reason)`; submitted transactions are then handed to
//! the [`Reconciler`] which owns every later transition. Nothing is retried.

use crate::accounts::WalletRegistry;
use crate::client::{NodeClient, SubmitError};
use crate::reconcile::Reconciler;
use crate::signer::Signer;
use crate::stats::BenchStats;
use crate::workloads::ComposeError;
use futures::stream::{self, Stream, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use txbench_types::{
    BatchId, FailureReason, PublicKey, SentTransaction, SignedTransaction, TransactionIntent,
    TxStatus,
};

/// Default cap on concurrent submissions.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 16;

/// Batch-level error reported alongside any partial successes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("Failed to compose batch: {0}")]
    Compose(#[from] ComposeError),

    #[error("All {total} transactions failed")]
    AllFailed { total: usize },

    #[error("{failed} of {total} transactions failed")]
    PartiallyFailed { failed: usize, total: usize },
}

/// Outcome of dispatching one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSummary {
    pub batch: BatchId,
    /// Every transaction of the batch in composition order, with its
    /// submission-stage status.
    pub transactions: Vec<SentTransaction>,
    pub error: Option<BatchError>,
}

impl BatchSummary {
    fn new(batch: BatchId, transactions: Vec<SentTransaction>) -> Self {
        let total = transactions.len();
        let failed = transactions.iter().filter(|t| t.status.is_failed()).count();
        let error = match failed {
            0 => None,
            f if f == total => Some(BatchError::AllFailed { total }),
            f => Some(BatchError::PartiallyFailed { failed: f, total }),
        };
        Self {
            batch,
            transactions,
            error,
        }
    }

    pub fn accepted(&self) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.status == TxStatus::Accepted)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.transactions
            .iter()
            .filter(|t| t.status.is_failed())
            .count()
    }

    /// Number of transactions that failed for `reason`.
    pub fn failed_with(&self, reason: &FailureReason) -> usize {
        self.transactions
            .iter()
            .filter(|t| matches!(&t.status, TxStatus::Failed(r) if r == reason))
            .count()
    }
}

enum Entry {
    Ready(SignedTransaction),
    Failed(SentTransaction),
}

/// A signed batch waiting for submission.
pub struct PreparedBatch {
    batch: BatchId,
    entries: Vec<Entry>,
}

impl PreparedBatch {
    pub fn batch(&self) -> BatchId {
        self.batch
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry as it stands before submission.
    pub fn synced(&self) -> Vec<SentTransaction> {
        self.entries
            .iter()
            .map(|entry| match entry {
                Entry::Ready(signed) => SentTransaction::submitted(signed),
                Entry::Failed(sent) => sent.clone(),
            })
            .collect()
    }
}

/// Signs and submits batches.
pub struct DispatchPipeline {
    node: Arc<dyn NodeClient>,
    signer: Arc<dyn Signer>,
    registry: Arc<WalletRegistry>,
    reconciler: Reconciler,
    stats: Arc<BenchStats>,
    max_in_flight: usize,
}

impl DispatchPipeline {
    pub fn new(
        node: Arc<dyn NodeClient>,
        signer: Arc<dyn Signer>,
        registry: Arc<WalletRegistry>,
        reconciler: Reconciler,
        stats: Arc<BenchStats>,
    ) -> Self {
        Self {
            node,
            signer,
            registry,
            reconciler,
            stats,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Sign every intent. Intents the signer refuses fail with `Signing`.
    pub fn prepare(&self, batch: BatchId, intents: Vec<TransactionIntent>) -> PreparedBatch {
        let entries = intents
            .into_iter()
            .map(|intent| {
                let Some(wallet) = self.registry.get(&intent.sender) else {
                    self.stats.errors.fetch_add(1, Ordering::SeqCst);
                    let reason = FailureReason::Signing(format!("unknown wallet {}", intent.sender));
                    return Entry::Failed(SentTransaction::failed_before_submission(intent, reason));
                };
                match self.signer.sign(&intent, wallet.private_key()) {
                    Ok(signed) => Entry::Ready(signed),
                    Err(e) => {
                        self.stats.errors.fetch_add(1, Ordering::SeqCst);
                        warn!(sender = %intent.sender, nonce = intent.nonce, error = %e, "Signing failed");
                        Entry::Failed(SentTransaction::failed_before_submission(
                            intent,
                            FailureReason::Signing(e.to_string()),
                        ))
                    }
                }
            })
            .collect();
        PreparedBatch { batch, entries }
    }

    /// Submit a prepared batch, yielding `(index, outcome)` pairs as they
    /// settle. Entries that failed signing are yielded first.
    pub fn submit(
        &self,
        prepared: PreparedBatch,
        cancel: CancellationToken,
    ) -> impl Stream<Item = (usize, SentTransaction)> + '_ {
        let mut failed = Vec::new();
        let mut ready = Vec::new();
        for (index, entry) in prepared.entries.into_iter().enumerate() {
            match entry {
                Entry::Ready(signed) => ready.push((index, signed)),
                Entry::Failed(sent) => failed.push((index, sent)),
            }
        }

        let submissions = stream::iter(ready)
            .map(move |(index, signed)| {
                let cancel = cancel.clone();
                async move { (index, self.submit_one(signed, &cancel).await) }
            })
            .buffer_unordered(self.max_in_flight);

        stream::iter(failed).chain(submissions)
    }

    /// Submit a prepared batch and wait for every entry to settle.
    pub async fn dispatch(&self, prepared: PreparedBatch, cancel: CancellationToken) -> BatchSummary {
        let batch = prepared.batch;
        let mut outcomes: Vec<(usize, SentTransaction)> =
            self.submit(prepared, cancel).collect().await;
        outcomes.sort_by_key(|(index, _)| *index);

        let summary = BatchSummary::new(batch, outcomes.into_iter().map(|(_, t)| t).collect());
        info!(
            batch,
            total = summary.transactions.len(),
            accepted = summary.accepted(),
            failed = summary.failed(),
            "Batch dispatched"
        );
        summary
    }

    /// Sign and submit `intents` as batch `batch`.
    pub async fn send(
        &self,
        batch: BatchId,
        intents: Vec<TransactionIntent>,
        cancel: CancellationToken,
    ) -> BatchSummary {
        let prepared = self.prepare(batch, intents);
        self.dispatch(prepared, cancel).await
    }

    async fn submit_one(&self, signed: SignedTransaction, cancel: &CancellationToken) -> SentTransaction {
        let mut sent = SentTransaction::submitted(&signed);

        if cancel.is_cancelled() {
            self.stats.cancelled.fetch_add(1, Ordering::SeqCst);
            settle(&mut sent, TxStatus::Failed(FailureReason::Cancelled));
            return sent;
        }

        self.stats.submitted.fetch_add(1, Ordering::SeqCst);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.node.submit_transaction(&signed) => Some(result),
        };

        let next = match result {
            None => {
                self.stats.cancelled.fetch_add(1, Ordering::SeqCst);
                TxStatus::Failed(FailureReason::Cancelled)
            }
            Some(Ok(hash)) => {
                self.stats.accepted.fetch_add(1, Ordering::SeqCst);
                sent.hash = Some(hash);
                TxStatus::Accepted
            }
            Some(Err(err)) => {
                match &err {
                    SubmitError::Transport(_) => {
                        self.stats.errors.fetch_add(1, Ordering::SeqCst);
                    }
                    SubmitError::StaleSequence { .. } => {
                        self.stats.rejected.fetch_add(1, Ordering::SeqCst);
                        self.resync(&signed.intent.sender, cancel).await;
                    }
                    SubmitError::Rejected(_) => {
                        self.stats.rejected.fetch_add(1, Ordering::SeqCst);
                    }
                }
                warn!(
                    sender = %signed.intent.sender,
                    nonce = signed.intent.nonce,
                    error = %err,
                    "Submission failed"
                );
                TxStatus::Failed(err.into())
            }
        };

        settle(&mut sent, next);
        self.reconciler.track(sent.clone());
        sent
    }

    /// Pull the sender's state from the node after a sequence rejection.
    async fn resync(&self, sender: &PublicKey, cancel: &CancellationToken) {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.node.account(sender) => result,
        };
        match result {
            Ok(state) => {
                self.registry.resync(sender, state);
            }
            Err(e) => warn!(wallet = %sender, error = %e, "Failed to resync wallet"),
        }
    }
}

fn settle(sent: &mut SentTransaction, next: TxStatus) {
    if let Err(e) = sent.transition(next) {
        warn!(error = %e, "Invalid submission transition");
    } else {
        debug!(nonce = sent.intent.nonce, status = %sent.status, "Submission settled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AccountState, MemoryNode, NodeError};
    use crate::reconcile::ReconcileSettings;
    use crate::signer::{DigestSigner, SigningError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use txbench_types::{Amount, MempoolTransaction, PrivateKey, TxHash, WalletRecord};

    struct Harness {
        node: Arc<MemoryNode>,
        registry: Arc<WalletRegistry>,
        reconciler: Reconciler,
        stats: Arc<BenchStats>,
    }

    impl Harness {
        fn new(node: MemoryNode, registry_nonce: u64) -> Self {
            let node = Arc::new(node);
            node.set_account(PublicKey::new("alice"), Amount::from_tokens(10), registry_nonce);
            let registry = Arc::new(WalletRegistry::new());
            registry.replace(vec![WalletRecord {
                public_key: PublicKey::new("alice"),
                private_key: PrivateKey::new("sk-alice"),
                balance: Amount::from_tokens(10),
                nonce: registry_nonce,
            }]);
            let reconciler = Reconciler::new(
                node.clone(),
                Arc::clone(&registry),
                ReconcileSettings::default(),
            );
            Self {
                node,
                registry,
                reconciler,
                stats: Arc::new(BenchStats::default()),
            }
        }

        fn pipeline(&self, signer: Arc<dyn Signer>) -> DispatchPipeline {
            DispatchPipeline::new(
                self.node.clone(),
                signer,
                Arc::clone(&self.registry),
                self.reconciler.clone(),
                Arc::clone(&self.stats),
            )
        }

        fn intents(&self, count: usize) -> Vec<TransactionIntent> {
            let wallet = self.registry.get(&PublicKey::new("alice")).unwrap();
            (0..count)
                .map(|_| TransactionIntent {
                    batch: 0,
                    sender: PublicKey::new("alice"),
                    receiver: PublicKey::new("bob"),
                    amount: Amount::from_nano(1),
                    fee: Amount::from_nano(1),
                    nonce: wallet.next_nonce(),
                    memo: None,
                    created_at_ms: 0,
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_transport_failure_is_isolated() {
        let h = Harness::new(MemoryNode::new(), 0);
        h.node.fail_nonce(&PublicKey::new("alice"), 1);
        let pipeline = h.pipeline(Arc::new(DigestSigner));

        let summary = pipeline
            .send(0, h.intents(3), CancellationToken::new())
            .await;

        let statuses: Vec<_> = summary.transactions.iter().map(|t| t.status.clone()).collect();
        assert_eq!(statuses[0], TxStatus::Accepted);
        assert!(matches!(
            statuses[1],
            TxStatus::Failed(FailureReason::Transport(_))
        ));
        assert_eq!(statuses[2], TxStatus::Accepted);
        assert_eq!(
            summary.error,
            Some(BatchError::PartiallyFailed { failed: 1, total: 3 })
        );

        // The failed nonce is not handed out again.
        let next = h.intents(1);
        assert_eq!(next[0].nonce, 3);

        assert_eq!(h.reconciler.in_flight_count(), 2);
        assert_eq!(h.stats.submitted.load(Ordering::SeqCst), 3);
        assert_eq!(h.stats.accepted.load(Ordering::SeqCst), 2);
        assert_eq!(h.stats.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_sequence_resyncs_wallet() {
        let h = Harness::new(MemoryNode::new(), 0);
        h.node.set_account(PublicKey::new("alice"), Amount::from_tokens(9), 5);
        let pipeline = h.pipeline(Arc::new(DigestSigner));

        let summary = pipeline
            .send(0, h.intents(2), CancellationToken::new())
            .await;

        assert_eq!(summary.error, Some(BatchError::AllFailed { total: 2 }));
        assert_eq!(
            summary.transactions[0].status,
            TxStatus::Failed(FailureReason::StaleSequence {
                expected: Some(5),
                got: 0
            })
        );
        let wallet = h.registry.get(&PublicKey::new("alice")).unwrap();
        assert_eq!(wallet.current_nonce(), 5);
        assert_eq!(wallet.balance(), Amount::from_tokens(9));
        assert_eq!(h.stats.rejected.load(Ordering::SeqCst), 2);
    }

    struct RefusingSigner;

    impl Signer for RefusingSigner {
        fn sign(
            &self,
            intent: &TransactionIntent,
            _private_key: &PrivateKey,
        ) -> Result<SignedTransaction, SigningError> {
            Err(SigningError::InvalidIntent(format!("nonce {}", intent.nonce)))
        }
    }

    #[tokio::test]
    async fn test_signing_failure_never_submits() {
        let h = Harness::new(MemoryNode::new(), 0);
        let pipeline = h.pipeline(Arc::new(RefusingSigner));

        let prepared = pipeline.prepare(0, h.intents(2));
        assert!(prepared
            .synced()
            .iter()
            .all(|t| matches!(t.status, TxStatus::Failed(FailureReason::Signing(_)))));

        let summary = pipeline.dispatch(prepared, CancellationToken::new()).await;
        assert_eq!(summary.failed(), 2);
        assert!(summary.transactions.iter().all(|t| t.hash.is_none()));
        assert_eq!(h.node.submission_count(), 0);
        assert_eq!(h.reconciler.tracked_count(), 0);
    }

    #[tokio::test]
    async fn test_synced_entries_are_submitted() {
        let h = Harness::new(MemoryNode::new(), 0);
        let pipeline = h.pipeline(Arc::new(DigestSigner));
        let prepared = pipeline.prepare(7, h.intents(3));

        assert_eq!(prepared.batch(), 7);
        let synced = prepared.synced();
        assert_eq!(synced.len(), 3);
        assert!(synced.iter().all(|t| t.status == TxStatus::Submitted && t.hash.is_some()));
    }

    #[tokio::test]
    async fn test_cancel_mid_dispatch() {
        let h = Harness::new(MemoryNode::new(), 0);
        h.node.stall_nonce(&PublicKey::new("alice"), 3);
        h.node.stall_nonce(&PublicKey::new("alice"), 4);
        let pipeline = Arc::new(h.pipeline(Arc::new(DigestSigner)).with_max_in_flight(5));

        let cancel = CancellationToken::new();
        let intents = h.intents(5);
        let task = {
            let pipeline = Arc::clone(&pipeline);
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.send(0, intents, cancel).await })
        };

        while h.node.submission_count() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();

        let summary = task.await.unwrap();
        assert_eq!(summary.accepted(), 3);
        assert_eq!(summary.failed_with(&FailureReason::Cancelled), 2);
        assert_eq!(summary.transactions[3].status, TxStatus::Failed(FailureReason::Cancelled));
        assert_eq!(h.stats.cancelled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_never_submits() {
        let h = Harness::new(MemoryNode::new(), 0);
        let pipeline = h.pipeline(Arc::new(DigestSigner));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = pipeline.send(0, h.intents(2), cancel).await;
        assert_eq!(summary.failed_with(&FailureReason::Cancelled), 2);
        assert_eq!(h.node.submission_count(), 0);
    }

    /// Node that records the peak number of concurrent submissions.
    #[derive(Default)]
    struct ConcurrencyProbe {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl NodeClient for ConcurrencyProbe {
        async fn submit_transaction(&self, tx: &SignedTransaction) -> Result<TxHash, SubmitError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(tx.hash.clone())
        }

        async fn pending_transactions(&self) -> Result<Vec<MempoolTransaction>, NodeError> {
            Ok(Vec::new())
        }

        async fn included_transactions(&self) -> Result<Vec<MempoolTransaction>, NodeError> {
            Ok(Vec::new())
        }

        async fn account(&self, public_key: &PublicKey) -> Result<AccountState, NodeError> {
            Err(NodeError::UnknownAccount(public_key.clone()))
        }
    }

    #[tokio::test]
    async fn test_in_flight_cap() {
        let h = Harness::new(MemoryNode::new(), 0);
        let probe = Arc::new(ConcurrencyProbe::default());
        let pipeline = DispatchPipeline::new(
            probe.clone(),
            Arc::new(DigestSigner),
            Arc::clone(&h.registry),
            h.reconciler.clone(),
            Arc::clone(&h.stats),
        )
        .with_max_in_flight(3);

        let summary = pipeline
            .send(0, h.intents(12), CancellationToken::new())
            .await;
        assert_eq!(summary.accepted(), 12);
        assert!(summary.error.is_none());
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
        assert!(probe.peak.load(Ordering::SeqCst) >= 2);
    }
}
