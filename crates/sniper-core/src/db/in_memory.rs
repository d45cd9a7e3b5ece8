//! Thread-safe in-memory implementations of the storage traits.
//!
//! Used by tests and single-instance development; production deployments use
//! the Postgres repositories.

use crate::db::{OrderSink, PositionStore, WalletDirectory};
use crate::types::{EncryptedKey, Order, Position, PositionStatus};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory implementation of [`WalletDirectory`].
#[derive(Default)]
pub struct InMemoryWalletDirectory {
    keys: Arc<RwLock<Vec<EncryptedKey>>>,
}

impl InMemoryWalletDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WalletDirectory for InMemoryWalletDirectory {
    async fn insert(&self, key: &EncryptedKey) -> Result<()> {
        self.keys.write().await.push(key.clone());
        Ok(())
    }

    async fn get(&self, user_ref: &str, wallet_id: Uuid) -> Result<Option<EncryptedKey>> {
        let keys = self.keys.read().await;
        Ok(keys
            .iter()
            .find(|k| k.user_ref == user_ref && k.wallet_id == wallet_id)
            .cloned())
    }

    async fn primary_for_user(&self, user_ref: &str) -> Result<Option<EncryptedKey>> {
        let keys = self.keys.read().await;
        Ok(keys
            .iter()
            .find(|k| k.user_ref == user_ref && k.is_primary && k.is_active)
            .cloned())
    }

    async fn list_active(&self, user_ref: &str) -> Result<Vec<EncryptedKey>> {
        let keys = self.keys.read().await;
        let mut active: Vec<EncryptedKey> = keys
            .iter()
            .filter(|k| k.user_ref == user_ref && k.is_active)
            .cloned()
            .collect();
        active.sort_by_key(|k| k.created_at);
        Ok(active)
    }

    async fn rotate_primary(&self, user_ref: &str, wallet_id: Uuid) -> Result<()> {
        let mut keys = self.keys.write().await;
        for key in keys.iter_mut().filter(|k| k.user_ref == user_ref) {
            key.is_primary = key.wallet_id == wallet_id;
        }
        Ok(())
    }

    async fn mark_used(&self, user_ref: &str, wallet_id: Uuid) -> Result<()> {
        let mut keys = self.keys.write().await;
        if let Some(key) = keys
            .iter_mut()
            .find(|k| k.user_ref == user_ref && k.wallet_id == wallet_id)
        {
            key.times_used += 1;
            key.last_used_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_active(&self, user_ref: &str, wallet_id: Uuid, active: bool) -> Result<()> {
        let mut keys = self.keys.write().await;
        if let Some(key) = keys
            .iter_mut()
            .find(|k| k.user_ref == user_ref && k.wallet_id == wallet_id)
        {
            key.is_active = active;
        }
        Ok(())
    }

    async fn delete(&self, user_ref: &str, wallet_id: Uuid) -> Result<bool> {
        let mut keys = self.keys.write().await;
        let before = keys.len();
        keys.retain(|k| !(k.user_ref == user_ref && k.wallet_id == wallet_id));
        Ok(keys.len() < before)
    }

    async fn delete_all_for_user(&self, user_ref: &str) -> Result<u64> {
        let mut keys = self.keys.write().await;
        let before = keys.len();
        keys.retain(|k| k.user_ref != user_ref);
        Ok((before - keys.len()) as u64)
    }
}

/// In-memory implementation of [`OrderSink`] that also records the full
/// transition history, so tests can assert state monotonicity.
#[derive(Default)]
pub struct InMemoryOrderSink {
    orders: Arc<RwLock<HashMap<Uuid, Order>>>,
    transitions: Arc<RwLock<Vec<(Uuid, String, String)>>>,
}

impl InMemoryOrderSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(from, to)` state names recorded for one order, in order.
    pub async fn transitions_for(&self, order_id: Uuid) -> Vec<(String, String)> {
        self.transitions
            .read()
            .await
            .iter()
            .filter(|(id, _, _)| *id == order_id)
            .map(|(_, from, to)| (from.clone(), to.clone()))
            .collect()
    }
}

#[async_trait]
impl OrderSink for InMemoryOrderSink {
    async fn insert(&self, order: &Order) -> Result<()> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn record_transition(&self, order: &Order, from_state: &str) -> Result<()> {
        self.orders.write().await.insert(order.id, order.clone());
        self.transitions.write().await.push((
            order.id,
            from_state.to_string(),
            order.state.name().to_string(),
        ));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }
}

/// In-memory implementation of [`PositionStore`].
#[derive(Default)]
pub struct InMemoryPositionStore {
    positions: Arc<RwLock<HashMap<Uuid, Position>>>,
}

impl InMemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionStore for InMemoryPositionStore {
    async fn insert(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.id, position.clone());
        Ok(())
    }

    async fn update(&self, position: &Position) -> Result<()> {
        self.positions
            .write()
            .await
            .insert(position.id, position.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        Ok(self.positions.read().await.get(&id).cloned())
    }

    async fn list_open(&self) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect())
    }
}
