//! Session controller.
//!
//! A [`Session`] is a single-owner actor. Callers hold a [`SessionHandle`],
//! send [`Command`]s and receive [`Event`]s. The actor owns the session
//! configuration and drives the other components:
//!
//! ```text
//!   Command ──► Session ──► BatchComposer ──► DispatchPipeline ──► Reconciler
//!                  ▲              │                  │                 │
//!                  │              └── WalletRegistry ◄┴─────────────────┘
//!                  └──────────────────── Event ◄────────────────────────
//! ```
//!
//! Configuration changes are applied synchronously and only affect batches
//! composed afterwards. Batches are dispatched on spawned tasks; closing the
//! session cancels them, waits for their summaries, and discards all tracked
//! state.

use crate::accounts::WalletRegistry;
use crate::client::NodeClient;
use crate::dispatch::{BatchError, DispatchPipeline, DEFAULT_MAX_IN_FLIGHT};
use crate::keystore::KeyStore;
use crate::reconcile::{PollOutcome, ReconcileSettings, Reconciler, ReconciliationReport};
use crate::signer::Signer;
use crate::stats::{BenchReport, BenchStats};
use crate::workloads::BatchComposer;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use txbench_types::{Amount, BatchId, PublicKey, SentTransaction, Wallet, WalletRecord};

/// Default number of transactions per batch.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Default fee per transaction (0.01 token).
pub const DEFAULT_FEE: Amount = Amount::from_nano(10_000_000);

/// Default transfer amount per transaction.
pub const DEFAULT_AMOUNT: Amount = Amount::from_nano(1_000);

/// Default reconciliation poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Settings read when a batch is composed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Transactions per batch (at least 1).
    pub batch_size: usize,
    pub fee: Amount,
    /// Amount transferred by each transaction.
    pub amount: Amount,
    /// Fixed recipient. When unset, each sender pays the next wallet.
    pub recipient: Option<PublicKey>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            fee: DEFAULT_FEE,
            amount: DEFAULT_AMOUNT,
            recipient: None,
        }
    }
}

/// Fixed parameters of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub config: SessionConfig,
    /// Initial random-wallet setting.
    pub random_wallet: bool,
    pub max_in_flight: usize,
    pub poll_interval: Duration,
    /// Periodic incremental wallet refresh. Disabled when `None`.
    pub wallet_refresh: Option<Duration>,
    pub reconcile: ReconcileSettings,
    /// Seed for wallet selection. Time-based when `None`.
    pub seed: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            config: SessionConfig::default(),
            random_wallet: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            wallet_refresh: None,
            reconcile: ReconcileSettings::default(),
            seed: None,
        }
    }
}

/// Commands accepted by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Cancel in-flight work, report, and stop.
    Close,
    /// Load wallets. `initial` replaces the registry; otherwise only changes
    /// are reported.
    GetWallets { initial: bool },
    ChangeTransactionBatch(usize),
    SendTxs,
    ToggleRandomWallet,
    SelectWallet(PublicKey),
    ChangeFee(Amount),
    /// Reconcile against the node now.
    GetAllTxs,
}

/// Events emitted by a session.
#[derive(Debug, Clone)]
pub enum Event {
    /// Result of an initial wallet load.
    GetWalletsSuccess(Vec<WalletRecord>),
    /// Wallets that changed, or the full set after a selection change.
    UpdateWalletsSuccess(Vec<Wallet>),
    /// A signed batch about to be submitted.
    SendTxSynced(Vec<SentTransaction>),
    /// Terminal summary of a batch. `transactions` is empty if composition
    /// failed.
    SendTxSuccess {
        batch: Option<BatchId>,
        transactions: Vec<SentTransaction>,
        error: Option<BatchError>,
    },
    /// Node pending and included sets against the tracked set.
    GetAllTxsSuccess(ReconciliationReport),
    /// Status changes produced by reconciliation.
    TransactionsReconciled(Vec<SentTransaction>),
    /// Current settings after a configuration command.
    ConfigChanged {
        config: SessionConfig,
        random_wallet: bool,
        selected: Option<PublicKey>,
    },
    SessionError(String),
    Closed(BenchReport),
}

/// Errors returned to session callers.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session is closed")]
    Closed,

    #[error("Session ended without a report")]
    NoReport,
}

/// Caller side of a running session.
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Queue a command. `Close` also cancels in-flight node calls at once, so
    /// the actor reaches it without waiting on them.
    pub fn send(&self, command: Command) -> Result<(), SessionError> {
        let closing = command == Command::Close;
        self.commands.send(command).map_err(|_| SessionError::Closed)?;
        if closing {
            self.cancel.cancel();
        }
        Ok(())
    }

    /// Next event, or `None` once the session has stopped.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.events.recv().await
    }

    /// Close the session and wait for its report, dropping other events.
    pub async fn close(mut self) -> Result<BenchReport, SessionError> {
        // The actor may already be gone; its report is still queued.
        let _ = self.send(Command::Close);
        while let Some(event) = self.events.recv().await {
            if let Event::Closed(report) = event {
                return Ok(report);
            }
        }
        Err(SessionError::NoReport)
    }
}

/// External collaborators a session drives.
pub struct SessionParts {
    pub node: Arc<dyn NodeClient>,
    pub keystore: Arc<dyn KeyStore>,
    pub signer: Arc<dyn Signer>,
}

/// The session actor.
pub struct Session {
    options: SessionOptions,
    config: SessionConfig,
    node: Arc<dyn NodeClient>,
    keystore: Arc<dyn KeyStore>,
    registry: Arc<WalletRegistry>,
    composer: BatchComposer,
    pipeline: Arc<DispatchPipeline>,
    reconciler: Reconciler,
    stats: Arc<BenchStats>,
    rng: ChaCha8Rng,
    cancel: CancellationToken,
    batches: JoinSet<()>,
    events: mpsc::UnboundedSender<Event>,
    commands: mpsc::UnboundedReceiver<Command>,
    started: Instant,
}

impl Session {
    /// Build a session and spawn its actor task.
    pub fn spawn(parts: SessionParts, options: SessionOptions) -> (SessionHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let session = Self::new(parts, options, command_rx, event_tx);
        let cancel = session.cancel.clone();
        let task = tokio::spawn(session.run());

        (
            SessionHandle {
                commands: command_tx,
                events: event_rx,
                cancel,
            },
            task,
        )
    }

    fn new(
        parts: SessionParts,
        options: SessionOptions,
        commands: mpsc::UnboundedReceiver<Command>,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let registry = Arc::new(WalletRegistry::new());
        registry.set_random_selection(options.random_wallet);

        let stats = Arc::new(BenchStats::default());
        let reconciler = Reconciler::new(
            Arc::clone(&parts.node),
            Arc::clone(&registry),
            options.reconcile,
        );
        let pipeline = DispatchPipeline::new(
            Arc::clone(&parts.node),
            parts.signer,
            Arc::clone(&registry),
            reconciler.clone(),
            Arc::clone(&stats),
        )
        .with_max_in_flight(options.max_in_flight);

        let seed = options.seed.unwrap_or_else(|| {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
        });

        Self {
            config: options.config.clone(),
            options,
            node: parts.node,
            keystore: parts.keystore,
            registry,
            composer: BatchComposer::new(),
            pipeline: Arc::new(pipeline),
            reconciler,
            stats,
            rng: ChaCha8Rng::seed_from_u64(seed),
            cancel: CancellationToken::new(),
            batches: JoinSet::new(),
            events,
            commands,
            started: Instant::now(),
        }
    }

    /// Run until `Close` arrives or every handle is dropped.
    pub async fn run(mut self) {
        info!(
            batch_size = self.config.batch_size,
            fee = %self.config.fee,
            max_in_flight = self.options.max_in_flight,
            poll_interval_ms = self.options.poll_interval.as_millis() as u64,
            "Starting session"
        );

        self.load_wallets(true).await;

        let (poll_tx, mut poll_rx) = mpsc::unbounded_channel();
        let poller = self.reconciler.start_polling(
            self.options.poll_interval,
            self.cancel.child_token(),
            poll_tx,
        );

        let mut refresh = self.options.wallet_refresh.map(|period| {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => break,
                    Some(command) => self.handle(command).await,
                },
                Some(outcome) = poll_rx.recv() => self.on_poll(outcome),
                Some(joined) = self.batches.join_next(), if !self.batches.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Batch task failed");
                    }
                }
                _ = tick(&mut refresh) => self.load_wallets(false).await,
            }
        }

        self.close(poller).await;
    }

    async fn handle(&mut self, command: Command) {
        debug!(?command, "Handling command");
        match command {
            Command::Close => {}
            Command::GetWallets { initial } => self.load_wallets(initial).await,
            Command::ChangeTransactionBatch(size) => {
                if size == 0 {
                    self.emit(Event::SessionError("Batch size must be at least 1".to_string()));
                    return;
                }
                self.config.batch_size = size;
                self.emit_config();
            }
            Command::ChangeFee(fee) => {
                self.config.fee = fee;
                self.emit_config();
            }
            Command::ToggleRandomWallet => {
                let enabled = self.registry.toggle_random_selection();
                info!(enabled, "Toggled random wallet selection");
                self.emit_config();
            }
            Command::SelectWallet(public_key) => match self.registry.select(&public_key) {
                Ok(_) => self.emit(Event::UpdateWalletsSuccess(self.registry.snapshot())),
                Err(e) => self.emit(Event::SessionError(e.to_string())),
            },
            Command::SendTxs => self.send_batch(),
            Command::GetAllTxs => {
                let result = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        debug!("Reconciliation cancelled");
                        return;
                    }
                    result = self.reconciler.poll() => result,
                };
                match result {
                    Ok(outcome) => self.on_poll(outcome),
                    Err(e) => self.emit(Event::SessionError(format!("Reconciliation failed: {e}"))),
                }
            }
        }
    }

    async fn load_wallets(&mut self, initial: bool) {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(initial, "Wallet load cancelled");
                return;
            }
            result = self
                .registry
                .load(initial, self.keystore.as_ref(), self.node.as_ref()) => result,
        };
        match result {
            Ok(wallets) if initial => {
                self.emit(Event::GetWalletsSuccess(
                    wallets.iter().map(Wallet::record).collect(),
                ));
            }
            Ok(wallets) => {
                if !wallets.is_empty() {
                    self.emit(Event::UpdateWalletsSuccess(wallets));
                }
            }
            Err(e) => {
                warn!(error = %e, initial, "Wallet load failed");
                self.emit(Event::SessionError(e.to_string()));
            }
        }
    }

    fn send_batch(&mut self) {
        let (batch, intents) = match self.composer.compose(&self.config, &self.registry, &mut self.rng) {
            Ok(composed) => composed,
            Err(e) => {
                warn!(error = %e, "Failed to compose batch");
                self.emit(Event::SendTxSuccess {
                    batch: None,
                    transactions: Vec::new(),
                    error: Some(e.into()),
                });
                return;
            }
        };
        self.stats
            .batches
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let pipeline = Arc::clone(&self.pipeline);
        let events = self.events.clone();
        let cancel = self.cancel.child_token();
        self.batches.spawn(async move {
            let prepared = pipeline.prepare(batch, intents);
            let _ = events.send(Event::SendTxSynced(prepared.synced()));
            let summary = pipeline.dispatch(prepared, cancel).await;
            let _ = events.send(Event::SendTxSuccess {
                batch: Some(summary.batch),
                transactions: summary.transactions,
                error: summary.error,
            });
        });
    }

    fn on_poll(&self, outcome: PollOutcome) {
        if !outcome.transitions.is_empty() {
            self.emit(Event::TransactionsReconciled(outcome.transitions));
        }
        self.emit(Event::GetAllTxsSuccess(outcome.report));
    }

    async fn close(mut self, poller: JoinHandle<()>) {
        info!(in_flight = self.batches.len(), "Closing session");
        self.cancel.cancel();

        while let Some(joined) = self.batches.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Batch task failed");
            }
        }
        if let Err(e) = poller.await {
            warn!(error = %e, "Polling task failed");
        }

        let report = self.stats.report(
            self.started,
            Some(self.reconciler.latency_report()),
            self.registry.usage_stats(),
        );
        self.reconciler.clear();
        self.registry.clear();

        info!(
            submitted = report.total_submitted,
            accepted = report.total_accepted,
            "Session closed"
        );
        self.emit(Event::Closed(report));
    }

    fn emit_config(&self) {
        self.emit(Event::ConfigChanged {
            config: self.config.clone(),
            random_wallet: self.registry.is_random_selection(),
            selected: self.registry.selected().map(|w| w.public_key().clone()),
        });
    }

    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
