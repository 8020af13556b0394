//! Benchmark configuration.
//!
//! Loaded from TOML. Every section and field has a default, so an empty file
//! is a valid configuration. Amounts are in nano units.
//!
//! ```toml
//! [node]
//! url = "http://127.0.0.1:3000"
//! request_timeout_ms = 10000
//! simulate = false
//!
//! [wallets]
//! key_file = "wallets.json"
//! refresh_interval_ms = 30000
//!
//! [session]
//! batch_size = 10
//! fee = 10000000
//! amount = 1000
//! random_wallet = false
//! batches = 5
//! interval_ms = 1000
//!
//! [dispatch]
//! max_in_flight = 16
//!
//! [reconcile]
//! poll_interval_ms = 10000
//! confirmation_deadline_secs = 900
//! retain_terminal_secs = 300
//! ```

use crate::dispatch::DEFAULT_MAX_IN_FLIGHT;
use crate::reconcile::{ReconcileSettings, DEFAULT_CONFIRMATION_DEADLINE, DEFAULT_RETAIN_TERMINAL};
use crate::session::{
    SessionConfig, SessionOptions, DEFAULT_AMOUNT, DEFAULT_BATCH_SIZE, DEFAULT_FEE,
    DEFAULT_POLL_INTERVAL,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use txbench_types::{Amount, PublicKey};

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level benchmark configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchConfig {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub wallets: WalletsConfig,

    #[serde(default)]
    pub session: SessionSection,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Base URL of the node's HTTP API.
    #[serde(default = "default_node_url")]
    pub url: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long to wait for the node to report ready.
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    /// Run against an in-process node instead of `url`.
    #[serde(default)]
    pub simulate: bool,

    /// Block interval of the in-process node.
    #[serde(default = "default_block_interval_ms")]
    pub block_interval_ms: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            url: default_node_url(),
            request_timeout_ms: default_request_timeout_ms(),
            ready_timeout_secs: default_ready_timeout_secs(),
            simulate: false,
            block_interval_ms: default_block_interval_ms(),
        }
    }
}

fn default_node_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_block_interval_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletsConfig {
    /// JSON key file. Required unless `node.simulate` is set.
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Number of generated wallets in simulate mode.
    #[serde(default = "default_simulated_count")]
    pub simulated_count: usize,

    /// Balance of each generated wallet in simulate mode (whole tokens).
    #[serde(default = "default_simulated_balance_tokens")]
    pub simulated_balance_tokens: u64,

    /// Seed for generated wallets.
    #[serde(default)]
    pub seed: u64,

    /// Periodic incremental refresh. Disabled when unset.
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
}

impl Default for WalletsConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            simulated_count: default_simulated_count(),
            simulated_balance_tokens: default_simulated_balance_tokens(),
            seed: 0,
            refresh_interval_ms: None,
        }
    }
}

fn default_simulated_count() -> usize {
    10
}

fn default_simulated_balance_tokens() -> u64 {
    1_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_fee")]
    pub fee: Amount,

    #[serde(default = "default_amount")]
    pub amount: Amount,

    #[serde(default)]
    pub recipient: Option<PublicKey>,

    #[serde(default)]
    pub random_wallet: bool,

    /// Seed for wallet selection. Time-based when unset.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Number of batches the CLI sends.
    #[serde(default = "default_batches")]
    pub batches: u64,

    /// Pause between batches.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Time to keep reconciling after the last batch before closing.
    #[serde(default = "default_finalize_ms")]
    pub finalize_ms: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            fee: default_fee(),
            amount: default_amount(),
            recipient: None,
            random_wallet: false,
            seed: None,
            batches: default_batches(),
            interval_ms: default_interval_ms(),
            finalize_ms: default_finalize_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_fee() -> Amount {
    DEFAULT_FEE
}

fn default_amount() -> Amount {
    DEFAULT_AMOUNT
}

fn default_batches() -> u64 {
    1
}

fn default_interval_ms() -> u64 {
    1_000
}

fn default_finalize_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_confirmation_deadline_secs")]
    pub confirmation_deadline_secs: u64,

    #[serde(default = "default_retain_terminal_secs")]
    pub retain_terminal_secs: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            confirmation_deadline_secs: default_confirmation_deadline_secs(),
            retain_terminal_secs: default_retain_terminal_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_confirmation_deadline_secs() -> u64 {
    DEFAULT_CONFIRMATION_DEADLINE.as_secs()
}

fn default_retain_terminal_secs() -> u64 {
    DEFAULT_RETAIN_TERMINAL.as_secs()
}

impl BenchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.batch_size == 0 {
            return Err(ConfigError::Invalid("session.batch_size must be at least 1".into()));
        }
        if self.dispatch.max_in_flight == 0 {
            return Err(ConfigError::Invalid("dispatch.max_in_flight must be at least 1".into()));
        }
        if self.reconcile.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("reconcile.poll_interval_ms must be positive".into()));
        }
        if self.node.url.is_empty() {
            return Err(ConfigError::Invalid("node.url must not be empty".into()));
        }
        if !self.node.simulate && self.wallets.key_file.is_none() {
            return Err(ConfigError::Invalid(
                "wallets.key_file is required unless node.simulate is set".into(),
            ));
        }
        if self.node.simulate && self.node.block_interval_ms == 0 {
            return Err(ConfigError::Invalid("node.block_interval_ms must be positive".into()));
        }
        if self.wallets.refresh_interval_ms == Some(0) {
            return Err(ConfigError::Invalid("wallets.refresh_interval_ms must be positive".into()));
        }
        if self.session.amount.checked_add(self.session.fee).is_none() {
            return Err(ConfigError::Invalid("session.amount plus session.fee overflows".into()));
        }
        Ok(())
    }

    /// Session parameters derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            config: SessionConfig {
                batch_size: self.session.batch_size,
                fee: self.session.fee,
                amount: self.session.amount,
                recipient: self.session.recipient.clone(),
            },
            random_wallet: self.session.random_wallet,
            max_in_flight: self.dispatch.max_in_flight,
            poll_interval: Duration::from_millis(self.reconcile.poll_interval_ms),
            wallet_refresh: self.wallets.refresh_interval_ms.map(Duration::from_millis),
            reconcile: ReconcileSettings {
                confirmation_deadline: Duration::from_secs(self.reconcile.confirmation_deadline_secs),
                retain_terminal: Duration::from_secs(self.reconcile.retain_terminal_secs),
            },
            seed: self.session.seed,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.node.request_timeout_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.session.interval_ms)
    }

    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.node.block_interval_ms)
    }

    pub fn finalize_window(&self) -> Duration {
        Duration::from_millis(self.session.finalize_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = BenchConfig::from_toml("").unwrap();
        assert!(!config.node.simulate);
        assert_eq!(config.session.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.dispatch.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.reconcile.confirmation_deadline_secs, 900);
        assert_eq!(config.reconcile.poll_interval_ms, 10_000);
        assert!(config.wallets.key_file.is_none());
    }

    #[test]
    fn test_key_file_required_unless_simulated() {
        let config = BenchConfig::from_toml("").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = BenchConfig::from_toml("[node]\nsimulate = true\n").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[node]
url = "http://node:8080"

[wallets]
key_file = "keys.json"
refresh_interval_ms = 2000

[session]
batch_size = 5
fee = 1
random_wallet = true
recipient = "B62qsink"

[dispatch]
max_in_flight = 4
"#
        )
        .unwrap();

        let config = BenchConfig::load(file.path()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.node.url, "http://node:8080");
        assert_eq!(config.wallets.key_file, Some(PathBuf::from("keys.json")));

        let options = config.session_options();
        assert_eq!(options.config.batch_size, 5);
        assert_eq!(options.config.fee, Amount::from_nano(1));
        assert_eq!(options.config.recipient, Some(PublicKey::new("B62qsink")));
        assert!(options.random_wallet);
        assert_eq!(options.max_in_flight, 4);
        assert_eq!(options.wallet_refresh, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config =
            BenchConfig::from_toml("[node]\nsimulate = true\n[session]\nbatch_size = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_section_is_an_error() {
        assert!(matches!(
            BenchConfig::from_toml("[metrics]\nenabled = true\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = BenchConfig::load(Path::new("/nonexistent/bench.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
