//! Database operations for orders and their state-transition history.

use crate::db::OrderSink;
use crate::types::{Order, OrderConfig, OrderState};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

/// Postgres repository for orders.
///
/// The current state is stored as JSONB on the order row; every transition
/// is additionally appended to `order_transitions` so the full path an order
/// took is reconstructable.
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order> {
        let config: serde_json::Value = row.try_get("config")?;
        let state: serde_json::Value = row.try_get("state")?;
        let config: OrderConfig = serde_json::from_value(config)?;
        let state: OrderState = serde_json::from_value(state)?;
        Ok(Order {
            id: row.try_get("id")?,
            user_ref: row.try_get("user_ref")?,
            config,
            state,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderSink for OrderRepository {
    async fn insert(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_ref, config, state, state_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id)
        .bind(&order.user_ref)
        .bind(serde_json::to_value(&order.config)?)
        .bind(serde_json::to_value(&order.state)?)
        .bind(order.state.name())
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_transition(&self, order: &Order, from_state: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE orders SET state = $2, state_name = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(serde_json::to_value(&order.state)?)
        .bind(order.state.name())
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::Api {
                message: format!("order {} not found for transition", order.id),
                status: None,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO order_transitions (order_id, from_state, to_state, payload, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(order.id)
        .bind(from_state)
        .bind(order.state.name())
        .bind(serde_json::to_value(&order.state)?)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(r#"SELECT * FROM orders WHERE id = $1"#)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_order).transpose()
    }
}
