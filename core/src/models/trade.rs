use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub ticker: String,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub price: i64,
    pub qty: i64,
    pub created_at: DateTime<Utc>,
}

/// Append one executed fill to the trade tape. Every fill produced by
/// the matching engine becomes exactly one row here — there is no
/// update or delete path, the tape is append-only by design.
#[allow(clippy::too_many_arguments)]
pub async fn record(
    pool: &PgPool,
    id: Uuid,
    ticker: &str,
    buy_order_id: Uuid,
    sell_order_id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    price: i64,
    qty: i64,
) -> Result<Trade, sqlx::Error> {
    sqlx::query_as::<_, Trade>(
        "INSERT INTO trades (id, ticker, buy_order_id, sell_order_id, buyer_id, seller_id, price, qty)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         RETURNING *",
    )
    .bind(id)
    .bind(ticker)
    .bind(buy_order_id)
    .bind(sell_order_id)
    .bind(buyer_id)
    .bind(seller_id)
    .bind(price)
    .bind(qty)
    .fetch_one(pool)
    .await
}

pub async fn list_for_user(
    pool: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Trade>, sqlx::Error> {
    sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades
         WHERE buyer_id = $1 OR seller_id = $1
         ORDER BY created_at DESC
         LIMIT $2 OFFSET $3",
    )
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn list_for_order(pool: &PgPool, order_id: Uuid) -> Result<Vec<Trade>, sqlx::Error> {
    sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE buy_order_id = $1 OR sell_order_id = $1 ORDER BY created_at ASC",
    )
    .bind(order_id)
    .fetch_all(pool)
    .await
}

pub async fn list_for_ticker(
    pool: &PgPool,
    ticker: &str,
    limit: i64,
) -> Result<Vec<Trade>, sqlx::Error> {
    sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE ticker = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(ticker)
    .bind(limit)
    .fetch_all(pool)
    .await
}
