//! Database access: connection pool, storage traits, and repositories.
//!
//! The traits are the seams the engine crates depend on; the Postgres
//! repositories implement them for production and the in-memory variants
//! back tests and single-instance development.

pub mod in_memory;
pub mod orders;
pub mod positions;
pub mod wallets;

use crate::config::DatabaseConfig;
use crate::types::{EncryptedKey, Order, Position};
use crate::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

pub use in_memory::{InMemoryOrderSink, InMemoryPositionStore, InMemoryWalletDirectory};
pub use orders::OrderRepository;
pub use positions::PositionRepository;
pub use wallets::WalletRepository;

/// Connect to the database.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;
    Ok(pool)
}

/// Run pending schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Storage for encrypted wallet keys.
#[async_trait]
pub trait WalletDirectory: Send + Sync {
    async fn insert(&self, key: &EncryptedKey) -> Result<()>;

    async fn get(&self, user_ref: &str, wallet_id: Uuid) -> Result<Option<EncryptedKey>>;

    async fn primary_for_user(&self, user_ref: &str) -> Result<Option<EncryptedKey>>;

    /// Active wallets for a user in canonical order (creation time ascending).
    async fn list_active(&self, user_ref: &str) -> Result<Vec<EncryptedKey>>;

    /// Make `wallet_id` the user's primary wallet, demoting the previous one
    /// in the same transaction.
    async fn rotate_primary(&self, user_ref: &str, wallet_id: Uuid) -> Result<()>;

    /// Increment `times_used` and stamp `last_used_at`.
    async fn mark_used(&self, user_ref: &str, wallet_id: Uuid) -> Result<()>;

    async fn set_active(&self, user_ref: &str, wallet_id: Uuid, active: bool) -> Result<()>;

    async fn delete(&self, user_ref: &str, wallet_id: Uuid) -> Result<bool>;

    /// Delete every key a user owns. Returns the number removed.
    async fn delete_all_for_user(&self, user_ref: &str) -> Result<u64>;
}

/// Persistence sink for order state transitions.
///
/// `record_transition` is called once per state change so the recorded
/// sequence is exactly the path the order took through the state machine.
#[async_trait]
pub trait OrderSink: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn record_transition(&self, order: &Order, from_state: &str) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>>;
}

/// Storage for positions.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn insert(&self, position: &Position) -> Result<()>;

    async fn update(&self, position: &Position) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Position>>;

    async fn list_open(&self) -> Result<Vec<Position>>;
}
