//! Multi-wallet rotation strategies.
//!
//! Round-robin fairness depends on the shared store's atomic increment:
//! concurrent selections are totally ordered by the counter, so no wallet is
//! picked twice within one round.

use crate::VaultError;
use dashmap::DashMap;
use rand::Rng;
use sniper_core::db::WalletDirectory;
use sniper_core::store::{keys, SharedStore};
use sniper_core::types::EncryptedKey;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Wallet selection strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStrategy {
    /// Always the primary wallet.
    PrimaryOnly,
    /// A specific wallet the user named.
    Specific(Uuid),
    /// Cycle through active wallets via the shared counter.
    RoundRobin,
    /// The wallet with the fewest uses, oldest-use first on ties.
    LeastUsed,
    /// Uniform random choice.
    Random,
}

/// How long a cached active-wallet list stays fresh.
const CACHE_TTL: Duration = Duration::from_secs(30);

struct CachedWallets {
    fetched_at: Instant,
    wallets: Vec<EncryptedKey>,
}

/// Strategy-driven wallet selector.
pub struct WalletRotator {
    wallets: Arc<dyn WalletDirectory>,
    store: Arc<dyn SharedStore>,
    cache: DashMap<String, CachedWallets>,
}

impl WalletRotator {
    pub fn new(wallets: Arc<dyn WalletDirectory>, store: Arc<dyn SharedStore>) -> Self {
        Self {
            wallets,
            store,
            cache: DashMap::new(),
        }
    }

    /// Select a wallet for the user according to the strategy.
    pub async fn select(
        &self,
        user_ref: &str,
        strategy: RotationStrategy,
    ) -> Result<EncryptedKey, VaultError> {
        let active = self.active_wallets(user_ref).await?;
        if active.is_empty() {
            return Err(VaultError::NoActiveWallets);
        }

        let selected = match strategy {
            RotationStrategy::PrimaryOnly => active
                .iter()
                .find(|w| w.is_primary)
                .ok_or(VaultError::NoPrimaryWallet)?
                .clone(),

            RotationStrategy::Specific(wallet_id) => active
                .iter()
                .find(|w| w.wallet_id == wallet_id)
                .ok_or(VaultError::WalletNotFound)?
                .clone(),

            RotationStrategy::RoundRobin => {
                let counter = self
                    .store
                    .incr(&keys::rotation_counter(user_ref))
                    .await?;
                // The counter starts at 1; wallets are in canonical
                // creation-time order.
                let index = ((counter - 1).max(0) as usize) % active.len();
                active[index].clone()
            }

            RotationStrategy::LeastUsed => active
                .iter()
                .min_by_key(|w| (w.times_used, w.last_used_at, w.created_at))
                .expect("non-empty list")
                .clone(),

            RotationStrategy::Random => {
                let index = rand::rng().random_range(0..active.len());
                active[index].clone()
            }
        };

        debug!(
            user_ref = %user_ref,
            wallet_id = %selected.wallet_id,
            strategy = ?strategy,
            "Wallet selected"
        );
        Ok(selected)
    }

    /// Record that a selected wallet was actually used.
    pub async fn mark_used(&self, wallet: &EncryptedKey) -> Result<(), VaultError> {
        self.wallets
            .mark_used(&wallet.user_ref, wallet.wallet_id)
            .await?;
        Ok(())
    }

    /// Drop the cached active-wallet list. Called on wallet create, delete,
    /// and activation changes.
    pub fn invalidate_cache(&self, user_ref: &str) {
        self.cache.remove(user_ref);
    }

    async fn active_wallets(&self, user_ref: &str) -> Result<Vec<EncryptedKey>, VaultError> {
        if let Some(cached) = self.cache.get(user_ref) {
            if cached.fetched_at.elapsed() < CACHE_TTL {
                return Ok(cached.wallets.clone());
            }
        }

        let wallets = self.wallets.list_active(user_ref).await?;
        self.cache.insert(
            user_ref.to_string(),
            CachedWallets {
                fetched_at: Instant::now(),
                wallets: wallets.clone(),
            },
        );
        Ok(wallets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::WalletVault;
    use sniper_core::db::InMemoryWalletDirectory;
    use sniper_core::store::MemoryStore;
    use std::collections::HashMap;

    const PASSWORD: &str = "rotate1234";

    async fn rotator_with_wallets(count: usize) -> (WalletRotator, Vec<EncryptedKey>) {
        let dir = Arc::new(InMemoryWalletDirectory::new());
        let vault = WalletVault::new(dir.clone());
        let mut created = Vec::new();
        for _ in 0..count {
            created.push(vault.create_wallet("user", PASSWORD, None).await.unwrap());
        }
        let store = Arc::new(MemoryStore::new());
        (WalletRotator::new(dir, store), created)
    }

    #[tokio::test]
    async fn test_primary_only() {
        let (rotator, wallets) = rotator_with_wallets(3).await;
        let selected = rotator
            .select("user", RotationStrategy::PrimaryOnly)
            .await
            .unwrap();
        assert_eq!(selected.wallet_id, wallets[0].wallet_id);
    }

    #[tokio::test]
    async fn test_specific_rejects_foreign_wallet() {
        let (rotator, _) = rotator_with_wallets(2).await;
        let err = rotator
            .select("user", RotationStrategy::Specific(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::WalletNotFound));
    }

    #[tokio::test]
    async fn test_no_active_wallets() {
        let dir = Arc::new(InMemoryWalletDirectory::new());
        let store = Arc::new(MemoryStore::new());
        let rotator = WalletRotator::new(dir, store);
        let err = rotator
            .select("nobody", RotationStrategy::RoundRobin)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::NoActiveWallets));
    }

    #[tokio::test]
    async fn test_round_robin_cycles_in_creation_order() {
        let (rotator, wallets) = rotator_with_wallets(3).await;
        let mut seen = Vec::new();
        for _ in 0..6 {
            let selected = rotator
                .select("user", RotationStrategy::RoundRobin)
                .await
                .unwrap();
            seen.push(selected.wallet_id);
        }
        let expected: Vec<Uuid> = wallets.iter().map(|w| w.wallet_id).collect();
        assert_eq!(&seen[..3], expected.as_slice());
        assert_eq!(&seen[3..], expected.as_slice());
    }

    #[tokio::test]
    async fn test_round_robin_concurrent_fairness() {
        let (rotator, _) = rotator_with_wallets(5).await;
        let rotator = Arc::new(rotator);

        let mut handles = Vec::new();
        for _ in 0..20 {
            let rotator = rotator.clone();
            handles.push(tokio::spawn(async move {
                rotator
                    .select("user", RotationStrategy::RoundRobin)
                    .await
                    .unwrap()
                    .wallet_id
            }));
        }

        let mut counts: HashMap<Uuid, u32> = HashMap::new();
        for handle in handles {
            *counts.entry(handle.await.unwrap()).or_default() += 1;
        }

        let total: u32 = counts.values().sum();
        assert_eq!(total, 20);
        let max = *counts.values().max().unwrap();
        let min = *counts.values().min().unwrap();
        assert!(
            (max as f64) / (min as f64) < 3.0,
            "distribution too skewed: max={max} min={min}"
        );
    }

    #[tokio::test]
    async fn test_least_used_prefers_untouched_wallet() {
        let (rotator, wallets) = rotator_with_wallets(3).await;

        rotator.mark_used(&wallets[0]).await.unwrap();
        rotator.mark_used(&wallets[1]).await.unwrap();
        rotator.invalidate_cache("user");

        let selected = rotator
            .select("user", RotationStrategy::LeastUsed)
            .await
            .unwrap();
        assert_eq!(selected.wallet_id, wallets[2].wallet_id);
    }

    #[tokio::test]
    async fn test_random_only_returns_owned_wallets() {
        let (rotator, wallets) = rotator_with_wallets(2).await;
        let owned: Vec<Uuid> = wallets.iter().map(|w| w.wallet_id).collect();
        for _ in 0..10 {
            let selected = rotator
                .select("user", RotationStrategy::Random)
                .await
                .unwrap();
            assert!(owned.contains(&selected.wallet_id));
        }
    }

    #[tokio::test]
    async fn test_cache_invalidation_sees_new_wallet() {
        let dir = Arc::new(InMemoryWalletDirectory::new());
        let vault = WalletVault::new(dir.clone());
        vault.create_wallet("user", PASSWORD, None).await.unwrap();

        let store = Arc::new(MemoryStore::new());
        let rotator = WalletRotator::new(dir.clone(), store);

        // Warm the cache, then add a wallet behind its back.
        rotator
            .select("user", RotationStrategy::PrimaryOnly)
            .await
            .unwrap();
        vault.create_wallet("user", PASSWORD, None).await.unwrap();

        rotator.invalidate_cache("user");
        let counts = {
            let mut ids = std::collections::HashSet::new();
            for _ in 0..4 {
                ids.insert(
                    rotator
                        .select("user", RotationStrategy::RoundRobin)
                        .await
                        .unwrap()
                        .wallet_id,
                );
            }
            ids.len()
        };
        assert_eq!(counts, 2);
    }
}
