//! Database operations for encrypted wallet keys.

use crate::db::WalletDirectory;
use crate::types::EncryptedKey;
use crate::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Postgres repository for encrypted wallet keys.
pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WalletDirectory for WalletRepository {
    async fn insert(&self, key: &EncryptedKey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallet_keys (
                id, user_ref, wallet_id, address, ciphertext, salt, nonce, auth_tag,
                label, is_primary, is_active, times_used, last_used_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(key.id)
        .bind(&key.user_ref)
        .bind(key.wallet_id)
        .bind(&key.address)
        .bind(&key.ciphertext)
        .bind(&key.salt)
        .bind(&key.nonce)
        .bind(&key.auth_tag)
        .bind(&key.label)
        .bind(key.is_primary)
        .bind(key.is_active)
        .bind(key.times_used)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, user_ref: &str, wallet_id: Uuid) -> Result<Option<EncryptedKey>> {
        let key = sqlx::query_as::<_, EncryptedKey>(
            r#"SELECT * FROM wallet_keys WHERE user_ref = $1 AND wallet_id = $2"#,
        )
        .bind(user_ref)
        .bind(wallet_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn primary_for_user(&self, user_ref: &str) -> Result<Option<EncryptedKey>> {
        let key = sqlx::query_as::<_, EncryptedKey>(
            r#"
            SELECT * FROM wallet_keys
            WHERE user_ref = $1 AND is_primary = TRUE AND is_active = TRUE
            "#,
        )
        .bind(user_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn list_active(&self, user_ref: &str) -> Result<Vec<EncryptedKey>> {
        let keys = sqlx::query_as::<_, EncryptedKey>(
            r#"
            SELECT * FROM wallet_keys
            WHERE user_ref = $1 AND is_active = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_ref)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn rotate_primary(&self, user_ref: &str, wallet_id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"UPDATE wallet_keys SET is_primary = FALSE WHERE user_ref = $1"#)
            .bind(user_ref)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE wallet_keys SET is_primary = TRUE
            WHERE user_ref = $1 AND wallet_id = $2
            "#,
        )
        .bind(user_ref)
        .bind(wallet_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn mark_used(&self, user_ref: &str, wallet_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wallet_keys
            SET times_used = times_used + 1, last_used_at = NOW()
            WHERE user_ref = $1 AND wallet_id = $2
            "#,
        )
        .bind(user_ref)
        .bind(wallet_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_active(&self, user_ref: &str, wallet_id: Uuid, active: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE wallet_keys SET is_active = $3
            WHERE user_ref = $1 AND wallet_id = $2
            "#,
        )
        .bind(user_ref)
        .bind(wallet_id)
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, user_ref: &str, wallet_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"DELETE FROM wallet_keys WHERE user_ref = $1 AND wallet_id = $2"#,
        )
        .bind(user_ref)
        .bind(wallet_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_for_user(&self, user_ref: &str) -> Result<u64> {
        let result = sqlx::query(r#"DELETE FROM wallet_keys WHERE user_ref = $1"#)
            .bind(user_ref)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
