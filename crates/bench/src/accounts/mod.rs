//! Wallet registry for transaction generation.
//!
//! Provides a `BenchWallet` type and a `WalletRegistry` holding the set of
//! benchmark wallets. Balances and sequence numbers are atomics so intents can
//! be composed concurrently while the reconciler corrects state from the node.

use crate::client::{AccountState, NodeClient, NodeError};
use crate::keystore::{KeyStore, KeyStoreError};
use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use txbench_types::{Amount, Nonce, PrivateKey, PublicKey, Wallet, WalletRecord};

/// A benchmark wallet that can sign transactions.
///
/// Uses an atomic nonce for thread-safe concurrent intent composition.
pub struct BenchWallet {
    public_key: PublicKey,
    private_key: PrivateKey,

    /// Last known balance in nano units.
    balance: AtomicU64,

    /// Next sequence number to hand out. Only ever moves forward.
    nonce: AtomicU64,

    /// Number of intents composed from this wallet.
    selections: AtomicU64,
}

impl BenchWallet {
    pub fn new(public_key: PublicKey, private_key: PrivateKey, balance: Amount, nonce: Nonce) -> Self {
        Self {
            public_key,
            private_key,
            balance: AtomicU64::new(balance.as_nano()),
            nonce: AtomicU64::new(nonce),
            selections: AtomicU64::new(0),
        }
    }

    fn from_record(record: WalletRecord) -> Self {
        Self::new(record.public_key, record.private_key, record.balance, record.nonce)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub fn balance(&self) -> Amount {
        Amount::from_nano(self.balance.load(Ordering::SeqCst))
    }

    /// Whether intents may be composed from this wallet.
    pub fn is_funded(&self) -> bool {
        !self.balance().is_zero()
    }

    /// Get the next nonce and increment atomically.
    ///
    /// Thread-safe for concurrent intent composition.
    pub fn next_nonce(&self) -> Nonce {
        self.nonce.fetch_add(1, Ordering::SeqCst)
    }

    /// Get current nonce without incrementing.
    pub fn current_nonce(&self) -> Nonce {
        self.nonce.load(Ordering::SeqCst)
    }

    /// Move the nonce forward to at least `nonce`. Returns whether it moved.
    pub fn advance_nonce_to(&self, nonce: Nonce) -> bool {
        self.nonce.fetch_max(nonce, Ordering::SeqCst) < nonce
    }

    /// Returns whether the balance changed.
    fn set_balance(&self, balance: Amount) -> bool {
        self.balance.swap(balance.as_nano(), Ordering::SeqCst) != balance.as_nano()
    }

    pub(crate) fn record_selection(&self) {
        self.selections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn selections(&self) -> u64 {
        self.selections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, selected: bool) -> Wallet {
        Wallet {
            public_key: self.public_key.clone(),
            private_key: self.private_key.clone(),
            balance: self.balance(),
            nonce: self.current_nonce(),
            selected,
        }
    }
}

impl std::fmt::Debug for BenchWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchWallet")
            .field("public_key", &self.public_key)
            .field("balance", &self.balance())
            .field("nonce", &self.current_nonce())
            .finish()
    }
}

/// The set of benchmark wallets and the current selection.
///
/// Registry order is the order wallets were loaded in and is stable across
/// upserts.
#[derive(Default)]
pub struct WalletRegistry {
    wallets: RwLock<Vec<Arc<BenchWallet>>>,
    selected: RwLock<Option<PublicKey>>,
    random_selection: AtomicBool,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch keys from `keystore` and balance/nonce for each from `node`.
    ///
    /// With `initial` set the registry contents are replaced and every wallet
    /// is returned. Otherwise the fetched state is merged with
    /// [`upsert`](Self::upsert) and only changed wallets are returned.
    pub async fn load(
        &self,
        initial: bool,
        keystore: &dyn KeyStore,
        node: &dyn NodeClient,
    ) -> Result<Vec<Wallet>, RegistryError> {
        let keys = keystore.keys().await?;

        let states = join_all(keys.iter().map(|(pk, _)| node.account(pk))).await;

        let mut records = Vec::with_capacity(keys.len());
        for ((public_key, private_key), state) in keys.into_iter().zip(states) {
            let state = match state {
                Ok(state) => state,
                Err(NodeError::UnknownAccount(_)) => {
                    warn!(wallet = %public_key, "Wallet unknown to node, treating as unfunded");
                    AccountState {
                        balance: Amount::ZERO,
                        nonce: 0,
                    }
                }
                Err(e) => return Err(e.into()),
            };
            records.push(WalletRecord {
                public_key,
                private_key,
                balance: state.balance,
                nonce: state.nonce,
            });
        }

        if initial {
            Ok(self.replace(records))
        } else {
            Ok(self.upsert(records))
        }
    }

    /// Replace the registry contents, returning every wallet.
    ///
    /// Wallets that are still present keep their counters: the balance is
    /// refreshed and the nonce only moves forward. The selection survives if
    /// its wallet is still present; otherwise the first wallet becomes
    /// selected.
    pub fn replace(&self, records: Vec<WalletRecord>) -> Vec<Wallet> {
        let mut current = self.wallets.write();
        let wallets: Vec<Arc<BenchWallet>> = records
            .into_iter()
            .map(|record| {
                match current.iter().find(|w| w.public_key() == &record.public_key) {
                    Some(existing) => {
                        existing.set_balance(record.balance);
                        existing.advance_nonce_to(record.nonce);
                        Arc::clone(existing)
                    }
                    None => Arc::new(BenchWallet::from_record(record)),
                }
            })
            .collect();

        {
            let mut selected = self.selected.write();
            let keep = selected
                .as_ref()
                .is_some_and(|pk| wallets.iter().any(|w| w.public_key() == pk));
            if !keep {
                *selected = wallets.first().map(|w| w.public_key().clone());
            }
        }

        info!(wallets = wallets.len(), "Loaded wallet registry");
        *current = wallets;
        drop(current);
        self.snapshot()
    }

    /// Merge balance and sequence state into existing wallets, appending
    /// unknown ones. Returns the wallets that changed.
    ///
    /// Sequence numbers merge with `max`, so a counter that already handed
    /// out numbers is never rewound.
    pub fn upsert(&self, records: Vec<WalletRecord>) -> Vec<Wallet> {
        let mut changed = Vec::new();
        {
            let mut wallets = self.wallets.write();
            for record in records {
                match wallets.iter().find(|w| w.public_key() == &record.public_key) {
                    Some(wallet) => {
                        let balance_changed = wallet.set_balance(record.balance);
                        let nonce_changed = wallet.advance_nonce_to(record.nonce);
                        if balance_changed || nonce_changed {
                            changed.push(Arc::clone(wallet));
                        }
                    }
                    None => {
                        let wallet = Arc::new(BenchWallet::from_record(record));
                        changed.push(Arc::clone(&wallet));
                        wallets.push(wallet);
                    }
                }
            }
        }

        debug!(changed = changed.len(), "Upserted wallets");
        let selected = self.selected.read().clone();
        changed
            .iter()
            .map(|w| w.snapshot(selected.as_ref() == Some(w.public_key())))
            .collect()
    }

    /// Make `public_key` the selected wallet.
    pub fn select(&self, public_key: &PublicKey) -> Result<Wallet, RegistryError> {
        let wallet = self
            .get(public_key)
            .ok_or_else(|| RegistryError::NotFound(public_key.clone()))?;
        *self.selected.write() = Some(public_key.clone());
        Ok(wallet.snapshot(true))
    }

    /// The selected wallet, if any.
    pub fn selected(&self) -> Option<Arc<BenchWallet>> {
        let selected = self.selected.read().clone()?;
        self.get(&selected)
    }

    /// Flip random wallet selection, returning the new setting.
    pub fn toggle_random_selection(&self) -> bool {
        !self.random_selection.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn set_random_selection(&self, enabled: bool) {
        self.random_selection.store(enabled, Ordering::SeqCst);
    }

    pub fn is_random_selection(&self) -> bool {
        self.random_selection.load(Ordering::SeqCst)
    }

    pub fn get(&self, public_key: &PublicKey) -> Option<Arc<BenchWallet>> {
        self.wallets
            .read()
            .iter()
            .find(|w| w.public_key() == public_key)
            .cloned()
    }

    /// All wallets in registry order.
    pub fn wallets(&self) -> Vec<Arc<BenchWallet>> {
        self.wallets.read().clone()
    }

    /// Wallets with a non-zero balance, in registry order.
    pub fn eligible(&self) -> Vec<Arc<BenchWallet>> {
        self.wallets
            .read()
            .iter()
            .filter(|w| w.is_funded())
            .cloned()
            .collect()
    }

    /// Record that the node included a transaction with sequence `nonce - 1`
    /// (or otherwise expects `nonce` next). Returns whether the counter moved.
    pub fn observe_nonce(&self, public_key: &PublicKey, nonce: Nonce) -> bool {
        match self.get(public_key) {
            Some(wallet) => wallet.advance_nonce_to(nonce),
            None => false,
        }
    }

    /// Correct a wallet from node truth after a sequence rejection.
    ///
    /// Returns the wallet's nonce after the resync.
    pub fn resync(&self, public_key: &PublicKey, state: AccountState) -> Option<Nonce> {
        let wallet = self.get(public_key)?;
        wallet.set_balance(state.balance);
        if wallet.advance_nonce_to(state.nonce) {
            info!(wallet = %public_key, nonce = state.nonce, "Resynced wallet sequence");
        }
        Some(wallet.current_nonce())
    }

    /// Drop every wallet and the selection.
    pub fn clear(&self) {
        self.wallets.write().clear();
        *self.selected.write() = None;
        self.random_selection.store(false, Ordering::SeqCst);
    }

    /// Point-in-time view of every wallet, in registry order.
    pub fn snapshot(&self) -> Vec<Wallet> {
        let selected = self.selected.read().clone();
        self.wallets
            .read()
            .iter()
            .map(|w| w.snapshot(selected.as_ref() == Some(w.public_key())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.wallets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.read().is_empty()
    }

    /// Get usage statistics for analysis.
    pub fn usage_stats(&self) -> WalletUsageStats {
        let wallets = self.wallets.read();

        let mut total_selections = 0u64;
        let mut max_selections = 0u64;
        let mut min_selections = u64::MAX;

        for wallet in wallets.iter() {
            let count = wallet.selections();
            total_selections += count;
            max_selections = max_selections.max(count);
            if count > 0 {
                min_selections = min_selections.min(count);
            }
        }

        if min_selections == u64::MAX {
            min_selections = 0;
        }

        let wallet_count = wallets.len();
        let avg_selections = if wallet_count > 0 {
            total_selections as f64 / wallet_count as f64
        } else {
            0.0
        };

        WalletUsageStats {
            total_selections,
            avg_selections,
            max_selections,
            min_selections,
            wallet_count,
        }
    }
}

/// Statistics about wallet usage distribution.
#[derive(Clone, Debug, Default)]
pub struct WalletUsageStats {
    /// Total number of composed intents.
    pub total_selections: u64,
    /// Average selections per wallet.
    pub avg_selections: f64,
    /// Maximum selections for any wallet.
    pub max_selections: u64,
    /// Minimum selections for any wallet (excluding unused).
    pub min_selections: u64,
    pub wallet_count: usize,
}

impl WalletUsageStats {
    /// Calculate the skew ratio (max / avg). Higher = more uneven.
    pub fn skew_ratio(&self) -> f64 {
        if self.avg_selections > 0.0 {
            self.max_selections as f64 / self.avg_selections
        } else {
            0.0
        }
    }
}

/// Errors that can occur during wallet registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Wallet not found: {0}")]
    NotFound(PublicKey),

    #[error("Failed to read wallet keys: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Failed to fetch wallet state: {0}")]
    Node(#[from] NodeError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryNode;
    use crate::keystore::StaticKeyStore;
    use std::collections::HashSet;

    fn record(pk: &str, balance: u64, nonce: Nonce) -> WalletRecord {
        WalletRecord {
            public_key: PublicKey::new(pk),
            private_key: PrivateKey::new(format!("sk-{pk}")),
            balance: Amount::from_nano(balance),
            nonce,
        }
    }

    fn registry() -> WalletRegistry {
        let registry = WalletRegistry::new();
        registry.replace(vec![record("a", 100, 0), record("b", 0, 5), record("c", 50, 2)]);
        registry
    }

    #[test]
    fn test_atomic_nonce() {
        let wallet = BenchWallet::new(PublicKey::new("a"), PrivateKey::new("k"), Amount::ZERO, 10);
        assert_eq!(wallet.next_nonce(), 10);
        assert_eq!(wallet.next_nonce(), 11);
        assert_eq!(wallet.current_nonce(), 12);

        assert!(!wallet.advance_nonce_to(5));
        assert_eq!(wallet.current_nonce(), 12);
        assert!(wallet.advance_nonce_to(20));
        assert_eq!(wallet.next_nonce(), 20);
    }

    #[test]
    fn test_concurrent_nonces_are_gap_free() {
        let wallet = BenchWallet::new(PublicKey::new("a"), PrivateKey::new("k"), Amount::ZERO, 7);
        let per_thread = 500;
        let threads = 8;

        let mut all: Vec<Nonce> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..threads)
                .map(|_| s.spawn(|| (0..per_thread).map(|_| wallet.next_nonce()).collect::<Vec<_>>()))
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });

        all.sort_unstable();
        let expected: Vec<Nonce> = (7..7 + (threads * per_thread) as u64).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_replace_selects_first_wallet() {
        let registry = registry();
        let wallets = registry.snapshot();
        assert_eq!(wallets.len(), 3);
        assert!(wallets[0].selected);
        assert!(!wallets[1].selected);
        assert_eq!(
            registry.selected().unwrap().public_key(),
            &PublicKey::new("a")
        );
    }

    #[test]
    fn test_replace_keeps_existing_selection() {
        let registry = registry();
        registry.select(&PublicKey::new("c")).unwrap();
        registry.replace(vec![record("a", 1, 0), record("c", 1, 0)]);
        assert_eq!(
            registry.selected().unwrap().public_key(),
            &PublicKey::new("c")
        );
    }

    #[test]
    fn test_replace_never_rewinds_surviving_wallets() {
        let registry = registry();
        let a = registry.get(&PublicKey::new("a")).unwrap();
        for _ in 0..5 {
            a.next_nonce();
        }
        a.record_selection();

        registry.replace(vec![record("a", 9, 2), record("d", 1, 4)]);

        let reloaded = registry.get(&PublicKey::new("a")).unwrap();
        assert!(Arc::ptr_eq(&a, &reloaded));
        assert_eq!(reloaded.current_nonce(), 5);
        assert_eq!(reloaded.balance(), Amount::from_nano(9));
        assert_eq!(reloaded.selections(), 1);
        assert_eq!(registry.get(&PublicKey::new("d")).unwrap().current_nonce(), 4);
        assert!(registry.get(&PublicKey::new("b")).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_upsert_merges_and_preserves_selection() {
        let registry = registry();
        registry.select(&PublicKey::new("c")).unwrap();

        // Handed out nonces 2 and 3 before the node caught up.
        let c = registry.get(&PublicKey::new("c")).unwrap();
        c.next_nonce();
        c.next_nonce();

        let changed = registry.upsert(vec![
            record("a", 100, 0),
            record("c", 40, 3),
            record("d", 10, 0),
        ]);

        let keys: Vec<_> = changed.iter().map(|w| w.public_key.as_str()).collect();
        assert_eq!(keys, vec!["c", "d"]);
        assert_eq!(c.current_nonce(), 4);
        assert_eq!(c.balance(), Amount::from_nano(40));
        assert!(changed[0].selected);
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_upsert_never_rewinds() {
        let registry = registry();
        registry.upsert(vec![record("b", 0, 9)]);
        registry.upsert(vec![record("b", 0, 6)]);
        assert_eq!(registry.get(&PublicKey::new("b")).unwrap().current_nonce(), 9);
    }

    #[test]
    fn test_select_unknown_wallet() {
        let registry = registry();
        let err = registry.select(&PublicKey::new("zzz")).unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
        assert_eq!(
            registry.selected().unwrap().public_key(),
            &PublicKey::new("a")
        );
    }

    #[test]
    fn test_toggle_random_selection() {
        let registry = registry();
        assert!(!registry.is_random_selection());
        assert!(registry.toggle_random_selection());
        assert!(registry.is_random_selection());
        assert!(!registry.toggle_random_selection());
    }

    #[test]
    fn test_eligible_skips_unfunded() {
        let registry = registry();
        let eligible: HashSet<_> = registry
            .eligible()
            .iter()
            .map(|w| w.public_key().clone())
            .collect();
        assert_eq!(eligible.len(), 2);
        assert!(!eligible.contains(&PublicKey::new("b")));
    }

    #[test]
    fn test_observe_and_resync() {
        let registry = registry();
        let a = PublicKey::new("a");
        assert!(registry.observe_nonce(&a, 3));
        assert!(!registry.observe_nonce(&a, 2));
        assert!(!registry.observe_nonce(&PublicKey::new("zzz"), 3));

        let nonce = registry.resync(
            &a,
            AccountState {
                balance: Amount::from_nano(5),
                nonce: 8,
            },
        );
        assert_eq!(nonce, Some(8));
        assert_eq!(registry.get(&a).unwrap().balance(), Amount::from_nano(5));
    }

    #[test]
    fn test_clear() {
        let registry = registry();
        registry.toggle_random_selection();
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.selected().is_none());
        assert!(!registry.is_random_selection());
    }

    #[test]
    fn test_usage_stats() {
        let registry = registry();
        let a = registry.get(&PublicKey::new("a")).unwrap();
        for _ in 0..4 {
            a.record_selection();
        }
        registry.get(&PublicKey::new("c")).unwrap().record_selection();

        let stats = registry.usage_stats();
        assert_eq!(stats.total_selections, 5);
        assert_eq!(stats.max_selections, 4);
        assert_eq!(stats.min_selections, 1);
        assert_eq!(stats.wallet_count, 3);
        assert!((stats.skew_ratio() - 4.0 / (5.0 / 3.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_load_initial_then_incremental() {
        let keystore = StaticKeyStore::generate(3, 1);
        let keys = keystore.keys().await.unwrap();
        let node = MemoryNode::new();
        for (i, (pk, _)) in keys.iter().enumerate() {
            node.set_account(pk.clone(), Amount::from_tokens(10), i as u64);
        }

        let registry = WalletRegistry::new();
        let loaded = registry.load(true, &keystore, &node).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[2].nonce, 2);

        let unchanged = registry.load(false, &keystore, &node).await.unwrap();
        assert!(unchanged.is_empty());

        node.set_account(keys[1].0.clone(), Amount::from_tokens(9), 4);
        let diff = registry.load(false, &keystore, &node).await.unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].public_key, keys[1].0);
        assert_eq!(diff[0].nonce, 4);
    }

    #[tokio::test]
    async fn test_load_treats_unknown_accounts_as_unfunded() {
        let keystore = StaticKeyStore::generate(2, 1);
        let keys = keystore.keys().await.unwrap();
        let node = MemoryNode::new();
        node.set_account(keys[0].0.clone(), Amount::from_tokens(1), 0);

        let registry = WalletRegistry::new();
        registry.load(true, &keystore, &node).await.unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.eligible().len(), 1);
    }
}
