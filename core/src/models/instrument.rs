use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Every balance and every trade price is denominated in this ticker.
/// It is seeded by migration and the registry refuses to delist it.
pub const QUOTE_TICKER: &str = "RUB";

/// Ticker format required everywhere an instrument is admitted: 2-10
/// uppercase ASCII letters. Anything else can never round-trip through
/// `QUOTE_TICKER` comparisons or the in-memory book keying, so it is
/// rejected before it ever reaches the database.
fn is_valid_ticker(ticker: &str) -> bool {
    (2..=10).contains(&ticker.len()) && ticker.bytes().all(|b| b.is_ascii_uppercase())
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Instrument {
    pub ticker: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum InstrumentError {
    #[error("instrument {0} is not admitted")]
    NotFound(String),
    #[error("instrument {0} already admitted")]
    AlreadyExists(String),
    #[error("the quote instrument cannot be delisted")]
    QuoteInstrument,
    #[error("ticker {0:?} is invalid: must be 2-10 uppercase ASCII letters")]
    InvalidTicker(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Admits a new instrument, or re-admits one that was previously
/// delisted (its `instruments` row is never physically removed, see
/// [`delete`], so re-admitting just clears `delisted_at`).
pub async fn admit(pool: &PgPool, ticker: &str, name: &str) -> Result<Instrument, InstrumentError> {
    if !is_valid_ticker(ticker) {
        return Err(InstrumentError::InvalidTicker(ticker.to_string()));
    }

    sqlx::query_as::<_, Instrument>(
        "INSERT INTO instruments (ticker, name) VALUES ($1, $2)
         ON CONFLICT (ticker) DO UPDATE
            SET name = EXCLUDED.name, delisted_at = NULL
            WHERE instruments.delisted_at IS NOT NULL
         RETURNING ticker, name, created_at",
    )
    .bind(ticker)
    .bind(name)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::RowNotFound => InstrumentError::AlreadyExists(ticker.to_string()),
        _ => InstrumentError::Database(e),
    })
}

/// Delists an instrument. The row is never hard-deleted: `orders` and
/// `trades` reference `instruments(ticker)` and both are permanent
/// history (trades are append-only per the trade tape, orders are only
/// ever soft-cancelled), so a real `DELETE` would either violate the
/// foreign key or destroy history. Delisting instead stamps
/// `delisted_at`, the same pattern used for revoked refresh tokens:
/// `get`/`list` exclude delisted rows, so the registry behaves exactly
/// as if the row were gone.
pub async fn delete(pool: &PgPool, ticker: &str) -> Result<(), InstrumentError> {
    if ticker == QUOTE_TICKER {
        return Err(InstrumentError::QuoteInstrument);
    }
    let result = sqlx::query(
        "UPDATE instruments SET delisted_at = now() WHERE ticker = $1 AND delisted_at IS NULL",
    )
    .bind(ticker)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(InstrumentError::NotFound(ticker.to_string()));
    }
    Ok(())
}

pub async fn get(pool: &PgPool, ticker: &str) -> Result<Option<Instrument>, sqlx::Error> {
    sqlx::query_as::<_, Instrument>(
        "SELECT ticker, name, created_at FROM instruments WHERE ticker = $1 AND delisted_at IS NULL",
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
}

pub async fn list(pool: &PgPool) -> Result<Vec<Instrument>, sqlx::Error> {
    sqlx::query_as::<_, Instrument>(
        "SELECT ticker, name, created_at FROM instruments WHERE delisted_at IS NULL ORDER BY ticker",
    )
    .fetch_all(pool)
    .await
}
