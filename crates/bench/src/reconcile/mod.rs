//! Mempool reconciliation.
//!
//! Pairs the node's pending and included transaction sets with the locally
//! tracked transactions. Accepted transactions become `Confirmed` once the
//! node includes them, or `Failed(Timeout)` when they disappear from both sets
//! past the confirmation deadline. Everything else the node reports is passed
//! through untouched so the caller sees third-party traffic too.
//!
//! Uses lock-free data structures to minimize contention with the dispatch
//! pipeline:
//! - DashMap for the tracked set (written by dispatch at handoff only)
//! - Atomics for stats counters
//! - parking_lot::Mutex for the confirmation latency histogram

use crate::accounts::WalletRegistry;
use crate::client::{NodeClient, NodeError};
use dashmap::DashMap;
use hdrhistogram::Histogram;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use txbench_types::{FailureReason, MempoolTransaction, SentTransaction, TxHash, TxStatus};

/// Default time an accepted transaction may stay unobserved before it fails.
pub const DEFAULT_CONFIRMATION_DEADLINE: Duration = Duration::from_secs(15 * 60);

/// Default time terminal entries stay in the tracked set.
pub const DEFAULT_RETAIN_TERMINAL: Duration = Duration::from_secs(300);

/// Tuning for the reconciler.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileSettings {
    pub confirmation_deadline: Duration,
    pub retain_terminal: Duration,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            confirmation_deadline: DEFAULT_CONFIRMATION_DEADLINE,
            retain_terminal: DEFAULT_RETAIN_TERMINAL,
        }
    }
}

struct Tracked {
    sent: SentTransaction,
    /// When dispatch handed the entry over.
    tracked_at: Instant,
    /// When the entry reached a terminal status.
    settled_at: Option<Instant>,
}

/// A discrepancy between local tracking and the node's view.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Anomaly {
    /// Accepted locally, in neither node set, still within the deadline.
    Missing { hash: TxHash },
    /// Present in both the pending and the included set.
    Duplicate { hash: TxHash },
    /// Failed locally but observed by the node.
    UnexpectedlyFailed { hash: TxHash, reason: String },
    /// Failed locally because confirmation timed out.
    TimedOut { hash: TxHash },
}

/// Snapshot of the node's transaction sets against the tracked set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub pending: Vec<MempoolTransaction>,
    pub included: Vec<MempoolTransaction>,
    /// Every tracked transaction, sorted by hash.
    pub tracked: Vec<SentTransaction>,
    pub anomalies: Vec<Anomaly>,
}

impl ReconciliationReport {
    pub fn count(&self, status: &TxStatus) -> usize {
        self.tracked.iter().filter(|t| &t.status == status).count()
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub report: ReconciliationReport,
    /// Entries whose status changed during this pass.
    pub transitions: Vec<SentTransaction>,
}

/// Statistics collected during reconciliation.
#[derive(Default)]
pub struct ReconcileStats {
    pub tracked: AtomicU64,
    pub confirmed: AtomicU64,
    pub timed_out: AtomicU64,
    pub polls: AtomicU64,
}

impl ReconcileStats {
    fn snapshot(&self) -> ReconcileStatsSnapshot {
        ReconcileStatsSnapshot {
            tracked: self.tracked.load(Ordering::Relaxed),
            confirmed: self.confirmed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            polls: self.polls.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileStatsSnapshot {
    pub tracked: u64,
    pub confirmed: u64,
    pub timed_out: u64,
    pub polls: u64,
}

/// Tracks submitted transactions and reconciles them against the node.
///
/// Clones share the same tracked set, histogram and counters.
#[derive(Clone)]
pub struct Reconciler {
    tracked: Arc<DashMap<TxHash, Tracked>>,
    /// Accept-to-confirm latency (microseconds).
    histogram: Arc<parking_lot::Mutex<Histogram<u64>>>,
    stats: Arc<ReconcileStats>,
    node: Arc<dyn NodeClient>,
    registry: Arc<WalletRegistry>,
    settings: ReconcileSettings,
}

impl Reconciler {
    pub fn new(
        node: Arc<dyn NodeClient>,
        registry: Arc<WalletRegistry>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            tracked: Arc::new(DashMap::new()),
            histogram: Arc::new(parking_lot::Mutex::new(
                Histogram::new(3).expect("histogram creation should succeed"),
            )),
            stats: Arc::new(ReconcileStats::default()),
            node,
            registry,
            settings,
        }
    }

    /// Take over a submitted transaction from the dispatch pipeline.
    ///
    /// Entries without a hash never reached the node and are not tracked.
    pub fn track(&self, sent: SentTransaction) {
        let Some(hash) = sent.hash.clone() else {
            debug!(nonce = sent.intent.nonce, "Not tracking transaction without hash");
            return;
        };
        let now = Instant::now();
        let settled_at = sent.is_terminal().then_some(now);
        self.tracked.insert(
            hash,
            Tracked {
                sent,
                tracked_at: now,
                settled_at,
            },
        );
        self.stats.tracked.fetch_add(1, Ordering::Relaxed);
    }

    /// Fetch both node sets and reconcile against them.
    pub async fn poll(&self) -> Result<PollOutcome, NodeError> {
        let (pending, included) = tokio::try_join!(
            self.node.pending_transactions(),
            self.node.included_transactions()
        )?;
        Ok(self.reconcile(pending, included, Instant::now()))
    }

    /// Reconcile the tracked set against a node snapshot taken at `now`.
    ///
    /// Repeating a call with the same snapshot changes no status and yields
    /// the same report.
    pub fn reconcile(
        &self,
        pending: Vec<MempoolTransaction>,
        included: Vec<MempoolTransaction>,
        now: Instant,
    ) -> PollOutcome {
        self.stats.polls.fetch_add(1, Ordering::Relaxed);

        let pending_hashes: HashSet<TxHash> = pending.iter().map(|tx| tx.hash.clone()).collect();
        let included_hashes: HashSet<TxHash> = included.iter().map(|tx| tx.hash.clone()).collect();

        let mut transitions = Vec::new();
        for mut entry in self.tracked.iter_mut() {
            let hash = entry.key().clone();
            let tracked = entry.value_mut();
            if tracked.sent.status != TxStatus::Accepted {
                continue;
            }

            let next = if included_hashes.contains(&hash) {
                TxStatus::Confirmed
            } else if !pending_hashes.contains(&hash)
                && now.saturating_duration_since(tracked.tracked_at)
                    >= self.settings.confirmation_deadline
            {
                TxStatus::Failed(FailureReason::Timeout)
            } else {
                continue;
            };

            if let Err(e) = tracked.sent.transition(next) {
                warn!(hash = %hash, error = %e, "Skipping invalid reconciliation transition");
                continue;
            }
            tracked.settled_at = Some(now);

            match tracked.sent.status {
                TxStatus::Confirmed => {
                    let latency = now.saturating_duration_since(tracked.tracked_at);
                    let _ = self.histogram.lock().record(latency.as_micros() as u64);
                    self.stats.confirmed.fetch_add(1, Ordering::Relaxed);
                    debug!(hash = %hash, latency_ms = latency.as_millis(), "Transaction confirmed");
                }
                _ => {
                    self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    info!(hash = %hash, "Transaction timed out");
                }
            }
            transitions.push(tracked.sent.clone());
        }

        // Included transactions fix the sender's next sequence.
        let mut next_nonces: HashMap<_, u64> = HashMap::new();
        for tx in &included {
            let next = next_nonces.entry(&tx.sender).or_default();
            *next = (*next).max(tx.nonce.saturating_add(1));
        }
        for (sender, nonce) in next_nonces {
            self.registry.observe_nonce(sender, nonce);
        }

        let report = self.build_report(pending, included, now);
        self.prune(now);

        transitions.sort_by(|a, b| a.hash.cmp(&b.hash));
        if !transitions.is_empty() {
            debug!(transitions = transitions.len(), "Reconciled transactions");
        }
        PollOutcome {
            report,
            transitions,
        }
    }

    fn build_report(
        &self,
        pending: Vec<MempoolTransaction>,
        included: Vec<MempoolTransaction>,
        now: Instant,
    ) -> ReconciliationReport {
        let pending_hashes: HashSet<&TxHash> = pending.iter().map(|tx| &tx.hash).collect();
        let included_hashes: HashSet<&TxHash> = included.iter().map(|tx| &tx.hash).collect();
        let mut anomalies: Vec<Anomaly> = pending_hashes
            .iter()
            .filter(|h| included_hashes.contains(*h))
            .map(|h| Anomaly::Duplicate { hash: (*h).clone() })
            .collect();

        let mut tracked: Vec<SentTransaction> = Vec::with_capacity(self.tracked.len());
        for entry in self.tracked.iter() {
            let hash = entry.key();
            let observed = pending_hashes.contains(hash) || included_hashes.contains(hash);
            let t = entry.value();
            match &t.sent.status {
                TxStatus::Accepted
                    if !observed
                        && now.saturating_duration_since(t.tracked_at)
                            < self.settings.confirmation_deadline =>
                {
                    anomalies.push(Anomaly::Missing { hash: hash.clone() });
                }
                TxStatus::Failed(FailureReason::Timeout) => {
                    if observed {
                        anomalies.push(Anomaly::UnexpectedlyFailed {
                            hash: hash.clone(),
                            reason: FailureReason::Timeout.to_string(),
                        });
                    }
                    anomalies.push(Anomaly::TimedOut { hash: hash.clone() });
                }
                TxStatus::Failed(reason) if observed => {
                    anomalies.push(Anomaly::UnexpectedlyFailed {
                        hash: hash.clone(),
                        reason: reason.to_string(),
                    });
                }
                _ => {}
            }
            tracked.push(t.sent.clone());
        }

        tracked.sort_by(|a, b| a.hash.cmp(&b.hash));
        anomalies.sort();

        ReconciliationReport {
            pending,
            included,
            tracked,
            anomalies,
        }
    }

    fn prune(&self, now: Instant) {
        let retain = self.settings.retain_terminal;
        let before = self.tracked.len();
        self.tracked.retain(|_, t| match t.settled_at {
            Some(settled) => now.saturating_duration_since(settled) < retain,
            None => true,
        });
        let pruned = before - self.tracked.len();
        if pruned > 0 {
            debug!(pruned, "Pruned settled transactions");
        }
    }

    /// Start polling every `interval` on a spawned task until `cancel` fires.
    ///
    /// Each successful pass is sent to `sink`; the task stops when the
    /// receiver is dropped.
    pub fn start_polling(
        &self,
        interval: Duration,
        cancel: CancellationToken,
        sink: mpsc::UnboundedSender<PollOutcome>,
    ) -> JoinHandle<()> {
        let reconciler = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let outcome = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    outcome = reconciler.poll() => outcome,
                };
                match outcome {
                    Ok(outcome) => {
                        if sink.send(outcome).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Reconciliation poll failed"),
                }
            }
            debug!("Reconciliation polling stopped");
        })
    }

    /// Current status of a tracked transaction.
    pub fn status(&self, hash: &TxHash) -> Option<TxStatus> {
        self.tracked.get(hash).map(|t| t.sent.status.clone())
    }

    /// Number of tracked entries still awaiting confirmation.
    pub fn in_flight_count(&self) -> usize {
        self.tracked
            .iter()
            .filter(|t| t.sent.status == TxStatus::Accepted)
            .count()
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Discard every tracked entry.
    pub fn clear(&self) {
        self.tracked.clear();
    }

    /// Summarise confirmation latency so far.
    pub fn latency_report(&self) -> LatencyReport {
        let histogram = {
            let guard = self.histogram.lock();
            guard.clone()
        };
        LatencyReport {
            histogram,
            stats: self.stats.snapshot(),
            unresolved: self.in_flight_count() as u64,
        }
    }
}

/// Confirmation latency measurements.
#[derive(Clone)]
pub struct LatencyReport {
    /// Accept-to-confirm latency histogram (values in microseconds).
    histogram: Histogram<u64>,
    stats: ReconcileStatsSnapshot,
    /// Accepted transactions neither confirmed nor timed out.
    unresolved: u64,
}

impl std::fmt::Debug for LatencyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyReport")
            .field("stats", &self.stats)
            .field("unresolved", &self.unresolved)
            .field("samples", &self.histogram.len())
            .finish()
    }
}

impl LatencyReport {
    /// Get the P50 (median) latency.
    pub fn p50_latency(&self) -> Duration {
        Duration::from_micros(self.histogram.value_at_quantile(0.50))
    }

    pub fn p90_latency(&self) -> Duration {
        Duration::from_micros(self.histogram.value_at_quantile(0.90))
    }

    pub fn p99_latency(&self) -> Duration {
        Duration::from_micros(self.histogram.value_at_quantile(0.99))
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_micros(self.histogram.max())
    }

    pub fn avg_latency(&self) -> Duration {
        Duration::from_micros(self.histogram.mean() as u64)
    }

    pub fn tracked(&self) -> u64 {
        self.stats.tracked
    }

    pub fn confirmed(&self) -> u64 {
        self.stats.confirmed
    }

    pub fn timed_out(&self) -> u64 {
        self.stats.timed_out
    }

    pub fn unresolved(&self) -> u64 {
        self.unresolved
    }

    /// Check if we have any latency measurements.
    pub fn has_measurements(&self) -> bool {
        !self.histogram.is_empty()
    }

    /// Print a summary of the latency report.
    pub fn print_summary(&self) {
        println!("\n--- Confirmation Report ---");
        println!("Tracked:    {}", self.stats.tracked);
        println!("Confirmed:  {}", self.stats.confirmed);
        println!("Timed out:  {}", self.stats.timed_out);
        println!("Unresolved: {}", self.unresolved);
        println!("Polls:      {}", self.stats.polls);

        if self.has_measurements() {
            println!();
            println!("Confirmation latency:");
            println!("  P50:  {:?}", self.p50_latency());
            println!("  P90:  {:?}", self.p90_latency());
            println!("  P99:  {:?}", self.p99_latency());
            println!("  Max:  {:?}", self.max_latency());
            println!("  Avg:  {:?}", self.avg_latency());
        } else {
            println!("\nNo confirmations recorded.");
        }
    }
}
