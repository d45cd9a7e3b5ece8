//! Database operations for positions.

use crate::db::PositionStore;
use crate::types::{Position, PositionStatus};
use crate::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Postgres repository for positions.
pub struct PositionRepository {
    pool: PgPool,
}

impl PositionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_position(row: &sqlx::postgres::PgRow) -> Result<Position> {
        let status: serde_json::Value = row.try_get("status")?;
        Ok(Position {
            id: row.try_get("id")?,
            order_ref: row.try_get("order_ref")?,
            user_ref: row.try_get("user_ref")?,
            mint: row.try_get("mint")?,
            entry_signature: row.try_get("entry_signature")?,
            entry_input_amount: row.try_get::<i64, _>("entry_input_amount")? as u64,
            entry_output_amount: row.try_get::<i64, _>("entry_output_amount")? as u64,
            current_balance: row.try_get::<i64, _>("current_balance")? as u64,
            entry_price: row.try_get("entry_price")?,
            take_profit_pct: row.try_get("take_profit_pct")?,
            stop_loss_pct: row.try_get("stop_loss_pct")?,
            trailing_stop_pct: row.try_get("trailing_stop_pct")?,
            highest_price: row.try_get("highest_price")?,
            status: serde_json::from_value(status)?,
            exit_signature: row.try_get("exit_signature")?,
            realized_pnl_sol: row.try_get("realized_pnl_sol")?,
            opened_at: row.try_get("opened_at")?,
            closed_at: row.try_get("closed_at")?,
        })
    }
}

#[async_trait]
impl PositionStore for PositionRepository {
    async fn insert(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, order_ref, user_ref, mint, entry_signature,
                entry_input_amount, entry_output_amount, current_balance, entry_price,
                take_profit_pct, stop_loss_pct, trailing_stop_pct, highest_price,
                status, exit_signature, realized_pnl_sol, opened_at, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(position.id)
        .bind(position.order_ref)
        .bind(&position.user_ref)
        .bind(&position.mint)
        .bind(&position.entry_signature)
        .bind(position.entry_input_amount as i64)
        .bind(position.entry_output_amount as i64)
        .bind(position.current_balance as i64)
        .bind(position.entry_price)
        .bind(position.take_profit_pct)
        .bind(position.stop_loss_pct)
        .bind(position.trailing_stop_pct)
        .bind(position.highest_price)
        .bind(serde_json::to_value(position.status)?)
        .bind(&position.exit_signature)
        .bind(position.realized_pnl_sol)
        .bind(position.opened_at)
        .bind(position.closed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE positions SET
                current_balance = $2, highest_price = $3, status = $4,
                exit_signature = $5, realized_pnl_sol = $6, closed_at = $7
            WHERE id = $1
            "#,
        )
        .bind(position.id)
        .bind(position.current_balance as i64)
        .bind(position.highest_price)
        .bind(serde_json::to_value(position.status)?)
        .bind(&position.exit_signature)
        .bind(position.realized_pnl_sol)
        .bind(position.closed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Position>> {
        let row = sqlx::query(r#"SELECT * FROM positions WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_position).transpose()
    }

    async fn list_open(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(r#"SELECT * FROM positions WHERE status = $1"#)
            .bind(serde_json::to_value(PositionStatus::Open)?)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_position).collect()
    }
}
