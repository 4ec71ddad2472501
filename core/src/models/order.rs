use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use super::ledger::{self, LedgerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum OrderType {
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyExecuted,
    Executed,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyExecuted => "PARTIALLY_EXECUTED",
            OrderStatus::Executed => "EXECUTED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ticker: String,
    pub direction: Direction,
    pub order_type: OrderType,
    /// LIMIT orders carry the price the trader named. MARKET orders
    /// carry `None` here: they never rest and have no price of their own.
    pub price: Option<i64>,
    /// What was actually reserved per unit when the order was placed —
    /// the limit price for a LIMIT order, or the worst-case price the
    /// book was walked to for a MARKET buy. Used to compute residual
    /// unlock amounts on cancellation and settlement.
    pub lock_price: Option<i64>,
    pub qty: i64,
    pub filled: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> i64 {
        self.qty - self.filled
    }

    pub fn is_resting_eligible(&self) -> bool {
        matches!(self.status, OrderStatus::New | OrderStatus::PartiallyExecuted)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("instrument {0} is not admitted")]
    InstrumentNotFound(String),
    #[error("not enough resting liquidity to fill this market order")]
    InsufficientLiquidity,
    #[error("order not found")]
    NotFound,
    #[error("order cannot be cancelled: status is {0}")]
    CannotCancel(OrderStatus),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Insert a new order row and lock the funds it requires in the same
/// transaction, so a crash between the two can never leave an order
/// placed without a matching lock. Called by the matching engine after
/// it has decided `lock_ticker`/`lock_amount` (quote asset at
/// `lock_price` for a BUY, the instrument itself for a SELL).
#[allow(clippy::too_many_arguments)]
pub async fn insert_with_lock(
    pool: &PgPool,
    id: Uuid,
    user_id: Uuid,
    ticker: &str,
    direction: Direction,
    order_type: OrderType,
    price: Option<i64>,
    lock_price: Option<i64>,
    qty: i64,
    lock_ticker: &str,
    lock_amount: i64,
) -> Result<Order, OrderError> {
    let mut tx = pool.begin().await?;

    ledger::lock_in_tx(&mut tx, user_id, lock_ticker, lock_amount, Some(id)).await?;

    let order = sqlx::query_as::<_, Order>(
        "INSERT INTO orders (id, user_id, ticker, direction, order_type, price, lock_price, qty)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(id)
    .bind(user_id)
    .bind(ticker)
    .bind(direction)
    .bind(order_type)
    .bind(price)
    .bind(lock_price)
    .bind(qty)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(order)
}

pub async fn get(pool: &PgPool, user_id: Uuid, order_id: Uuid) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 AND user_id = $2")
        .bind(order_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

pub async fn get_by_id(pool: &PgPool, order_id: Uuid) -> Result<Option<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Order>, sqlx::Error> {
    sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE user_id = $1
         ORDER BY created_at DESC LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

/// Cancel a resting order owned by `user_id`, releasing whatever portion
/// of its lock is still outstanding. The quantity a SELL order locks is
/// always 1:1 with the instrument, but a BUY order's lock was sized at
/// `lock_price`, which can differ from the later maker fill price — so
/// the unlock here must use `lock_price`, not `price`.
pub async fn cancel(
    pool: &PgPool,
    user_id: Uuid,
    order_id: Uuid,
    quote_ticker: &str,
) -> Result<Order, OrderError> {
    let mut tx = pool.begin().await?;

    let order = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(order_id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(OrderError::NotFound)?;

    if !order.is_resting_eligible() {
        return Err(OrderError::CannotCancel(order.status));
    }

    let remaining = order.remaining();
    if remaining > 0 {
        let (lock_ticker, unlock_amount) = match order.direction {
            Direction::Buy => (
                quote_ticker,
                remaining * order.lock_price.unwrap_or(order.price.unwrap_or(0)),
            ),
            Direction::Sell => (order.ticker.as_str(), remaining),
        };
        ledger::unlock_in_tx(&mut tx, user_id, lock_ticker, unlock_amount, Some(order_id)).await?;
    }

    let updated = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = 'CANCELLED', updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(order_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Remove every order still resting for a delisted instrument, unlocking
/// each trader's outstanding reservation. Used by admin instrument
/// delisting alongside `OrderBook::drain_all`.
pub async fn cancel_all_for_ticker(
    pool: &PgPool,
    ticker: &str,
    quote_ticker: &str,
) -> Result<Vec<Order>, OrderError> {
    let resting = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE ticker = $1 AND status IN ('NEW', 'PARTIALLY_EXECUTED')",
    )
    .bind(ticker)
    .fetch_all(pool)
    .await?;

    let mut cancelled = Vec::with_capacity(resting.len());
    for order in resting {
        cancelled.push(cancel(pool, order.user_id, order.id, quote_ticker).await?);
    }
    Ok(cancelled)
}

/// Apply one fill's worth of execution to an order's `filled`/`status`.
/// A no-op on an order that raced ahead to CANCELLED — the matching
/// engine holds the per-instrument lock so this should not happen, but
/// the guard costs nothing and keeps the invariant airtight.
pub async fn add_fill(pool: &PgPool, order_id: Uuid, fill_qty: i64) -> Result<Order, sqlx::Error> {
    sqlx::query_as::<_, Order>(
        "UPDATE orders SET
            filled = CASE WHEN status = 'CANCELLED' THEN filled ELSE filled + $1 END,
            status = CASE
                WHEN status = 'CANCELLED' THEN 'CANCELLED'
                WHEN filled + $1 >= qty THEN 'EXECUTED'
                ELSE 'PARTIALLY_EXECUTED'
            END,
            updated_at = now()
         WHERE id = $2
         RETURNING *",
    )
    .bind(fill_qty)
    .bind(order_id)
    .fetch_one(pool)
    .await
}
