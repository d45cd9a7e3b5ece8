//! Authoritative order lifecycle.
//!
//! Every transition is validated against the state table and persisted
//! before the caller proceeds. An invalid transition is a programmer error
//! and panics.

use chrono::Utc;
use sniper_core::db::OrderSink;
use sniper_core::types::{ExecutionError, ExecutionErrorCode, Order, OrderState};
use std::sync::Arc;
use tracing::{info, warn};

pub struct OrderStateMachine {
    sink: Arc<dyn OrderSink>,
}

impl OrderStateMachine {
    pub fn new(sink: Arc<dyn OrderSink>) -> Self {
        Self { sink }
    }

    /// Persist a freshly created order in its PENDING state.
    pub async fn create(&self, order: &Order) -> sniper_core::Result<()> {
        self.sink.insert(order).await
    }

    /// Advance an order to `next`, persisting the transition.
    ///
    /// Panics if the transition is not in the state table; that is a bug in
    /// the caller, not a runtime condition.
    pub async fn advance(&self, order: &mut Order, next: OrderState) -> sniper_core::Result<()> {
        let from = order.state.name();
        assert!(
            order.state.can_transition_to(&next),
            "invalid order state transition {} -> {} for order {}",
            from,
            next.name(),
            order.id
        );

        order.state = next;
        order.updated_at = Utc::now();

        info!(
            order_id = %order.id,
            from = from,
            to = order.state.name(),
            "Order state transition"
        );
        self.sink.record_transition(order, from).await
    }

    /// Move an order to FAILED with a typed error.
    pub async fn fail(
        &self,
        order: &mut Order,
        code: ExecutionErrorCode,
        message: impl Into<String>,
        retry_count: u32,
    ) -> sniper_core::Result<ExecutionError> {
        let error = ExecutionError::new(code, message);
        warn!(
            order_id = %order.id,
            code = error.code.as_str(),
            retries = retry_count,
            "Order failed: {}",
            error.message
        );
        self.advance(
            order,
            OrderState::Failed {
                error: error.clone(),
                retry_count,
            },
        )
        .await?;
        Ok(error)
    }
}
