pub use super::ledger::Balance;

use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct BalanceView {
    pub ticker: String,
    pub amount: i64,
    pub locked: i64,
    pub available: i64,
}

/// Every non-zero balance a user holds, for the `GET /api/v1/balance`
/// response. Rows at (0, 0) are garbage-collected on write (invariant
/// B2), so there is nothing to filter out here.
pub async fn get_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<BalanceView>, sqlx::Error> {
    let rows = super::ledger::get_for_user(pool, user_id).await?;
    Ok(rows
        .into_iter()
        .map(|(ticker, b)| BalanceView {
            ticker,
            amount: b.amount,
            locked: b.locked,
            available: b.available(),
        })
        .collect())
}
