//! txbench CLI
//!
//! Sends batches of payments to a node and reports throughput, acceptance
//! and inclusion latency.
//!
//! # Usage
//!
//! ```bash
//! # Against a node, wallets from a key file
//! txbench --config bench.toml
//!
//! # Ten batches of 50 from random wallets
//! txbench --config bench.toml --batches 10 --batch-size 50 --random-wallet
//!
//! # Self-contained run against an in-process node
//! txbench --simulate --batches 5
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use txbench::client::{HttpNodeClient, MemoryNode, NodeClient};
use txbench::config::BenchConfig;
use txbench::keystore::{JsonKeyStore, KeyStore, StaticKeyStore};
use txbench::reconcile::ReconciliationReport;
use txbench::session::{Command, Event, Session, SessionHandle, SessionParts};
use txbench::signer::DigestSigner;
use txbench_types::Amount;

/// txbench mempool benchmark
///
/// Composes, signs and submits payment batches, then reconciles them against
/// the node's mempool.
#[derive(Parser, Debug)]
#[command(name = "txbench")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Node API base URL (overrides config)
    #[arg(long)]
    node_url: Option<String>,

    /// Run against an in-process node with generated wallets
    #[arg(long)]
    simulate: bool,

    /// Wallet key file (overrides config)
    #[arg(long)]
    keys: Option<PathBuf>,

    /// Number of batches to send (overrides config)
    #[arg(long)]
    batches: Option<u64>,

    /// Transactions per batch (overrides config)
    #[arg(long)]
    batch_size: Option<usize>,

    /// Fee per transaction in nano units (overrides config)
    #[arg(long)]
    fee: Option<u64>,

    /// Pick the sender of each transaction at random
    #[arg(long)]
    random_wallet: bool,

    /// Milliseconds between batches (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Maximum concurrent submissions (overrides config)
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Log level filter (overrides RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to log file (redirects all logs to this file)
    #[arg(long)]
    logfile: Option<PathBuf>,
}

/// Apply CLI overrides to the configuration.
fn apply_overrides(config: &mut BenchConfig, cli: &Cli) {
    if let Some(ref url) = cli.node_url {
        config.node.url = url.clone();
    }

    if cli.simulate {
        config.node.simulate = true;
    }

    if let Some(ref keys) = cli.keys {
        config.wallets.key_file = Some(keys.clone());
    }

    if let Some(batches) = cli.batches {
        config.session.batches = batches;
    }

    if let Some(batch_size) = cli.batch_size {
        config.session.batch_size = batch_size;
    }

    if let Some(fee) = cli.fee {
        config.session.fee = Amount::from_nano(fee);
    }

    if cli.random_wallet {
        config.session.random_wallet = true;
    }

    if let Some(interval_ms) = cli.interval_ms {
        config.session.interval_ms = interval_ms;
    }

    if let Some(max_in_flight) = cli.max_in_flight {
        config.dispatch.max_in_flight = max_in_flight;
    }
}

fn init_logging(cli: &Cli) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let builder = tracing_subscriber::fmt();

    let guard = if let Some(log_file) = &cli.logfile {
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let file_name = log_file
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid log file name"))?
            .to_string_lossy()
            .to_string();
        let directory = log_file
            .parent()
            .unwrap_or(std::path::Path::new("."))
            .to_path_buf();

        let file_appender = tracing_appender::rolling::never(directory, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        builder
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
            )
            .init();
        Some(guard)
    } else {
        builder
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
            )
            .init();
        None
    };

    Ok(guard)
}

/// Node client and key source for the configured mode.
struct Backend {
    node: Arc<dyn NodeClient>,
    keystore: Arc<dyn KeyStore>,
    block_producer: Option<tokio::task::JoinHandle<()>>,
}

async fn build_backend(config: &BenchConfig, cancel: &CancellationToken) -> Result<Backend> {
    if config.node.simulate {
        let keystore = StaticKeyStore::generate(config.wallets.simulated_count, config.wallets.seed);
        let balance = Amount::from_tokens(config.wallets.simulated_balance_tokens);

        let node = Arc::new(MemoryNode::new());
        for (public_key, _) in keystore.keys().await? {
            node.set_account(public_key, balance, 0);
        }
        let block_producer = node.spawn_block_producer(config.block_interval(), cancel.child_token());

        info!(
            wallets = keystore.len(),
            balance = %balance,
            block_interval_ms = config.node.block_interval_ms,
            "Using in-process node"
        );

        return Ok(Backend {
            node,
            keystore: Arc::new(keystore),
            block_producer: Some(block_producer),
        });
    }

    let Some(ref key_file) = config.wallets.key_file else {
        bail!("No wallet key file configured");
    };

    let node = HttpNodeClient::with_timeout(config.node.url.clone(), config.request_timeout())
        .with_context(|| format!("Failed to create client for {}", config.node.url))?;

    info!(url = %config.node.url, keys = %key_file.display(), "Using remote node");

    Ok(Backend {
        node: Arc::new(node),
        keystore: Arc::new(JsonKeyStore::new(key_file.clone())),
        block_producer: None,
    })
}

async fn wait_for_ready(node: &dyn NodeClient, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !node.is_ready().await {
        if tokio::time::Instant::now() >= deadline {
            bail!("Node not ready after {:?}", timeout);
        }
        debug!("Waiting for node");
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

fn log_event(event: &Event) {
    match event {
        Event::GetWalletsSuccess(records) => info!(wallets = records.len(), "Wallets loaded"),
        Event::UpdateWalletsSuccess(wallets) => debug!(wallets = wallets.len(), "Wallets updated"),
        Event::SendTxSynced(transactions) => {
            debug!(transactions = transactions.len(), "Batch signed")
        }
        Event::SendTxSuccess {
            batch,
            transactions,
            error,
        } => match error {
            Some(e) => warn!(?batch, transactions = transactions.len(), error = %e, "Batch finished with failures"),
            None => info!(?batch, transactions = transactions.len(), "Batch accepted"),
        },
        Event::GetAllTxsSuccess(report) => {
            debug!(
                pending = report.pending.len(),
                included = report.included.len(),
                tracked = report.tracked.len(),
                anomalies = report.anomalies.len(),
                "Reconciled"
            );
            for anomaly in &report.anomalies {
                debug!(?anomaly, "Reconciliation anomaly");
            }
        }
        Event::TransactionsReconciled(changed) => {
            debug!(changed = changed.len(), "Transaction status changed")
        }
        Event::ConfigChanged { config, .. } => debug!(?config, "Configuration changed"),
        Event::SessionError(message) => error!(%message, "Session error"),
        Event::Closed(_) => {}
    }
}

/// Send the configured batches, then keep reconciling for the finalize window.
async fn drive(handle: &mut SessionHandle, config: &BenchConfig) -> Result<()> {
    let total = config.session.batches;
    let mut ticker = tokio::time::interval(config.batch_interval());
    let mut sent = 0u64;
    let mut finalize_at = None;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    if total == 0 {
        finalize_at = Some(tokio::time::Instant::now());
    }

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                info!(sent, "Stopping early");
                return Ok(());
            }
            event = handle.next_event() => match event {
                Some(event) => log_event(&event),
                None => bail!("Session stopped unexpectedly"),
            },
            _ = ticker.tick(), if sent < total => {
                handle.send(Command::SendTxs)?;
                sent += 1;
                if sent == total {
                    info!(batches = sent, window = ?config.finalize_window(), "All batches sent, finalizing");
                    finalize_at = Some(tokio::time::Instant::now() + config.finalize_window());
                }
            }
            _ = sleep_until_opt(finalize_at), if finalize_at.is_some() => break,
        }
    }

    handle.send(Command::GetAllTxs)?;
    tokio::select! {
        biased;
        _ = &mut shutdown => info!("Stopping before final reconciliation"),
        result = await_reconciliation(handle) => {
            if let Some(report) = result? {
                info!(
                    pending = report.pending.len(),
                    included = report.included.len(),
                    anomalies = report.anomalies.len(),
                    "Final reconciliation"
                );
            }
        }
    }
    Ok(())
}

/// Log events until the next reconciliation report. `None` if it failed.
async fn await_reconciliation(handle: &mut SessionHandle) -> Result<Option<ReconciliationReport>> {
    loop {
        match handle.next_event().await {
            Some(Event::GetAllTxsSuccess(report)) => {
                log_event(&Event::GetAllTxsSuccess(report.clone()));
                return Ok(Some(report));
            }
            Some(event @ Event::SessionError(_)) => {
                log_event(&event);
                return Ok(None);
            }
            Some(event) => log_event(&event),
            None => bail!("Session stopped unexpectedly"),
        }
    }
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BenchConfig::load(path)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?,
        None => BenchConfig::default(),
    };
    apply_overrides(&mut config, &cli);
    config.validate()?;

    let _log_guard = init_logging(&cli)?;

    info!(
        batches = config.session.batches,
        batch_size = config.session.batch_size,
        fee = %config.session.fee,
        random_wallet = config.session.random_wallet,
        max_in_flight = config.dispatch.max_in_flight,
        "txbench starting"
    );

    let cancel = CancellationToken::new();
    let backend = build_backend(&config, &cancel).await?;

    wait_for_ready(
        backend.node.as_ref(),
        Duration::from_secs(config.node.ready_timeout_secs),
    )
    .await?;

    let parts = SessionParts {
        node: Arc::clone(&backend.node),
        keystore: backend.keystore,
        signer: Arc::new(DigestSigner),
    };
    let (mut handle, task) = Session::spawn(parts, config.session_options());

    let outcome = drive(&mut handle, &config).await;

    let report = handle.close().await?;
    if let Err(e) = task.await {
        warn!(error = %e, "Session task failed");
    }

    cancel.cancel();
    if let Some(producer) = backend.block_producer {
        let _ = producer.await;
    }

    report.print();
    outcome
}
