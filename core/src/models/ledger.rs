use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
pub enum EntryType {
    Deposit,
    Withdrawal,
    Trade,
    Lock,
    Unlock,
}

impl std::fmt::Display for EntryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryType::Deposit => write!(f, "DEPOSIT"),
            EntryType::Withdrawal => write!(f, "WITHDRAWAL"),
            EntryType::Trade => write!(f, "TRADE"),
            EntryType::Lock => write!(f, "LOCK"),
            EntryType::Unlock => write!(f, "UNLOCK"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub ticker: String,
    pub entry_type: String,
    pub amount: i64,
    pub balance_after: i64,
    pub reference_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: i64, required: i64 },
    #[error("ledger overloaded, retry")]
    Overloaded,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// `amount` and `locked` for a single (user, ticker) balance row.
/// `available` is always `amount - locked` and is never stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::FromRow)]
pub struct Balance {
    pub amount: i64,
    pub locked: i64,
}

impl Balance {
    pub fn available(&self) -> i64 {
        self.amount - self.locked
    }
}

/// Credit a deposit or trade proceeds onto `amount`.
pub async fn credit(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    entry_type: EntryType,
    reference_id: Option<Uuid>,
    description: Option<&str>,
) -> Result<Balance, LedgerError> {
    retry(|| credit_once(pool, user_id, ticker, amount, entry_type, reference_id, description)).await
}

async fn credit_once(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    entry_type: EntryType,
    reference_id: Option<Uuid>,
    description: Option<&str>,
) -> Result<Balance, LedgerError> {
    let mut tx = pool.begin().await?;
    lock_row(&mut tx, user_id, ticker).await?;
    let current = load_row(&mut tx, user_id, ticker).await?;

    let updated = Balance {
        amount: current.amount + amount,
        locked: current.locked,
    };
    store_row(&mut tx, user_id, ticker, updated).await?;
    insert_entry(
        &mut tx,
        user_id,
        ticker,
        amount,
        updated.amount,
        entry_type,
        reference_id,
        description,
    )
    .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Debit a withdrawal or trade cost from `amount`. Fails if doing so
/// would leave `amount` below `locked`.
pub async fn debit(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    entry_type: EntryType,
    reference_id: Option<Uuid>,
    description: Option<&str>,
) -> Result<Balance, LedgerError> {
    retry(|| debit_once(pool, user_id, ticker, amount, entry_type, reference_id, description)).await
}

async fn debit_once(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    entry_type: EntryType,
    reference_id: Option<Uuid>,
    description: Option<&str>,
) -> Result<Balance, LedgerError> {
    let mut tx = pool.begin().await?;
    lock_row(&mut tx, user_id, ticker).await?;
    let current = load_row(&mut tx, user_id, ticker).await?;

    let new_amount = current.amount - amount;
    if new_amount < current.locked {
        return Err(LedgerError::InsufficientBalance {
            available: current.available(),
            required: amount,
        });
    }

    let updated = Balance {
        amount: new_amount,
        locked: current.locked,
    };
    store_row(&mut tx, user_id, ticker, updated).await?;
    insert_entry(
        &mut tx,
        user_id,
        ticker,
        -amount,
        updated.amount,
        entry_type,
        reference_id,
        description,
    )
    .await?;

    tx.commit().await?;
    Ok(updated)
}

/// Reserve `amount` of `available` balance against an order. Fails if
/// `available < amount`.
pub async fn lock(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    reference_id: Option<Uuid>,
) -> Result<Balance, LedgerError> {
    retry(|| lock_once(pool, user_id, ticker, amount, reference_id)).await
}

async fn lock_once(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    reference_id: Option<Uuid>,
) -> Result<Balance, LedgerError> {
    let mut tx = pool.begin().await?;
    let updated = lock_in_tx(&mut tx, user_id, ticker, amount, reference_id).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Same as [`lock`], but participates in a transaction the caller already
/// holds open (e.g. order placement, which inserts the order row in the
/// same transaction as the lock).
pub async fn lock_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    reference_id: Option<Uuid>,
) -> Result<Balance, LedgerError> {
    lock_row(tx, user_id, ticker).await?;
    let current = load_row(tx, user_id, ticker).await?;

    if amount > current.available() {
        return Err(LedgerError::InsufficientBalance {
            available: current.available(),
            required: amount,
        });
    }

    let updated = Balance {
        amount: current.amount,
        locked: current.locked + amount,
    };
    store_row(tx, user_id, ticker, updated).await?;
    insert_entry(
        tx,
        user_id,
        ticker,
        amount,
        updated.locked,
        EntryType::Lock,
        reference_id,
        Some("order placed"),
    )
    .await?;

    Ok(updated)
}

/// Release `amount` of previously locked balance. This subtracts from
/// `locked` — an earlier revision of this exchange's balance code added
/// instead, which silently grew a user's lock on every cancellation.
pub async fn unlock(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    reference_id: Option<Uuid>,
) -> Result<Balance, LedgerError> {
    retry(|| unlock_once(pool, user_id, ticker, amount, reference_id)).await
}

async fn unlock_once(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    reference_id: Option<Uuid>,
) -> Result<Balance, LedgerError> {
    let mut tx = pool.begin().await?;
    let updated = unlock_in_tx(&mut tx, user_id, ticker, amount, reference_id).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Same as [`unlock`], but participates in a transaction the caller
/// already holds open (e.g. order cancellation, which flips the order's
/// status in the same transaction as releasing its lock).
pub async fn unlock_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    reference_id: Option<Uuid>,
) -> Result<Balance, LedgerError> {
    lock_row(tx, user_id, ticker).await?;
    let current = load_row(tx, user_id, ticker).await?;

    let updated = Balance {
        amount: current.amount,
        locked: current.locked - amount,
    };
    store_row(tx, user_id, ticker, updated).await?;
    insert_entry(
        tx,
        user_id,
        ticker,
        -amount,
        updated.locked,
        EntryType::Unlock,
        reference_id,
        Some("order cancelled or fully settled"),
    )
    .await?;

    Ok(updated)
}

/// Settle one fill between a buyer and a seller of `ticker`, priced in
/// the quote asset. `lock_price` is what the buyer's order originally
/// reserved per unit (its own price for a LIMIT order, or the
/// worst-case price walked for a MARKET order); `price` is what the
/// fill actually executed at, which for a price-improving buy is lower.
/// The buyer gets the difference back as part of the unlock.
pub async fn settle_trade(
    pool: &PgPool,
    quote_ticker: &str,
    buyer_id: Uuid,
    seller_id: Uuid,
    ticker: &str,
    price: i64,
    qty: i64,
    lock_price: i64,
    trade_id: Uuid,
) -> Result<(), LedgerError> {
    retry(|| {
        settle_trade_once(
            pool,
            quote_ticker,
            buyer_id,
            seller_id,
            ticker,
            price,
            qty,
            lock_price,
            trade_id,
        )
    })
    .await
}

#[allow(clippy::too_many_arguments)]
async fn settle_trade_once(
    pool: &PgPool,
    quote_ticker: &str,
    buyer_id: Uuid,
    seller_id: Uuid,
    ticker: &str,
    price: i64,
    qty: i64,
    lock_price: i64,
    trade_id: Uuid,
) -> Result<(), LedgerError> {
    let mut tx = pool.begin().await?;

    // Acquire every advisory lock this settlement touches up front, in a
    // fixed order, so two concurrent settlements can never deadlock on
    // each other's rows.
    let mut legs = [
        (buyer_id, quote_ticker),
        (buyer_id, ticker),
        (seller_id, quote_ticker),
        (seller_id, ticker),
    ];
    legs.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(b.1)));
    for (user_id, leg_ticker) in legs {
        lock_row(&mut tx, user_id, leg_ticker).await?;
    }

    let quote_cost = price
        .checked_mul(qty)
        .expect("trade notional does not overflow i64");
    let lock_cost = lock_price
        .checked_mul(qty)
        .expect("trade notional does not overflow i64");

    let buyer_quote = load_row(&mut tx, buyer_id, quote_ticker).await?;
    let buyer_quote = Balance {
        amount: buyer_quote.amount - quote_cost,
        locked: buyer_quote.locked - lock_cost,
    };
    store_row(&mut tx, buyer_id, quote_ticker, buyer_quote).await?;
    insert_entry(
        &mut tx,
        buyer_id,
        quote_ticker,
        -lock_cost,
        buyer_quote.locked,
        EntryType::Unlock,
        Some(trade_id),
        Some("trade settlement: release buyer lock"),
    )
    .await?;
    insert_entry(
        &mut tx,
        buyer_id,
        quote_ticker,
        -quote_cost,
        buyer_quote.amount,
        EntryType::Trade,
        Some(trade_id),
        Some("trade settlement: buyer pays"),
    )
    .await?;

    let buyer_base = load_row(&mut tx, buyer_id, ticker).await?;
    let buyer_base = Balance {
        amount: buyer_base.amount + qty,
        locked: buyer_base.locked,
    };
    store_row(&mut tx, buyer_id, ticker, buyer_base).await?;
    insert_entry(
        &mut tx,
        buyer_id,
        ticker,
        qty,
        buyer_base.amount,
        EntryType::Trade,
        Some(trade_id),
        Some("trade settlement: buyer receives"),
    )
    .await?;

    let seller_base = load_row(&mut tx, seller_id, ticker).await?;
    let seller_base = Balance {
        amount: seller_base.amount - qty,
        locked: seller_base.locked - qty,
    };
    store_row(&mut tx, seller_id, ticker, seller_base).await?;
    insert_entry(
        &mut tx,
        seller_id,
        ticker,
        -qty,
        seller_base.locked,
        EntryType::Unlock,
        Some(trade_id),
        Some("trade settlement: release seller lock"),
    )
    .await?;
    insert_entry(
        &mut tx,
        seller_id,
        ticker,
        -qty,
        seller_base.amount,
        EntryType::Trade,
        Some(trade_id),
        Some("trade settlement: seller delivers"),
    )
    .await?;

    let seller_quote = load_row(&mut tx, seller_id, quote_ticker).await?;
    let seller_quote = Balance {
        amount: seller_quote.amount + quote_cost,
        locked: seller_quote.locked,
    };
    store_row(&mut tx, seller_id, quote_ticker, seller_quote).await?;
    insert_entry(
        &mut tx,
        seller_id,
        quote_ticker,
        quote_cost,
        seller_quote.amount,
        EntryType::Trade,
        Some(trade_id),
        Some("trade settlement: seller receives"),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn get_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<(String, Balance)>, sqlx::Error> {
    let rows: Vec<(String, i64, i64)> =
        sqlx::query_as("SELECT ticker, amount, locked FROM balances WHERE user_id = $1 AND (amount != 0 OR locked != 0)")
            .bind(user_id)
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(ticker, amount, locked)| (ticker, Balance { amount, locked }))
        .collect())
}

pub async fn get_history(
    pool: &PgPool,
    user_id: Uuid,
    ticker: &str,
    limit: i64,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    sqlx::query_as::<_, LedgerEntry>(
        "SELECT * FROM ledger_entries
         WHERE user_id = $1 AND ticker = $2
         ORDER BY created_at DESC, id DESC
         LIMIT $3",
    )
    .bind(user_id)
    .bind(ticker)
    .bind(limit)
    .fetch_all(pool)
    .await
}

async fn lock_row(tx: &mut Transaction<'_, Postgres>, user_id: Uuid, ticker: &str) -> Result<(), sqlx::Error> {
    let key = compute_lock_key(user_id, ticker);
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn load_row(tx: &mut Transaction<'_, Postgres>, user_id: Uuid, ticker: &str) -> Result<Balance, sqlx::Error> {
    sqlx::query(
        "INSERT INTO balances (user_id, ticker, amount, locked) VALUES ($1, $2, 0, 0)
         ON CONFLICT (user_id, ticker) DO NOTHING",
    )
    .bind(user_id)
    .bind(ticker)
    .execute(&mut **tx)
    .await?;

    sqlx::query_as::<_, Balance>(
        "SELECT amount, locked FROM balances WHERE user_id = $1 AND ticker = $2 FOR UPDATE",
    )
    .bind(user_id)
    .bind(ticker)
    .fetch_one(&mut **tx)
    .await
}

async fn store_row(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ticker: &str,
    balance: Balance,
) -> Result<(), sqlx::Error> {
    // Row GC (invariant B2): a balance at zero/zero carries no
    // information and is deleted rather than kept around forever.
    if balance.amount == 0 && balance.locked == 0 {
        sqlx::query("DELETE FROM balances WHERE user_id = $1 AND ticker = $2")
            .bind(user_id)
            .bind(ticker)
            .execute(&mut **tx)
            .await?;
        return Ok(());
    }

    sqlx::query(
        "UPDATE balances SET amount = $1, locked = $2, updated_at = now()
         WHERE user_id = $3 AND ticker = $4",
    )
    .bind(balance.amount)
    .bind(balance.locked)
    .bind(user_id)
    .bind(ticker)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    ticker: &str,
    amount: i64,
    balance_after: i64,
    entry_type: EntryType,
    reference_id: Option<Uuid>,
    description: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ledger_entries (user_id, ticker, entry_type, amount, balance_after, reference_id, description)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(user_id)
    .bind(ticker)
    .bind(entry_type.to_string())
    .bind(amount)
    .bind(balance_after)
    .bind(reference_id)
    .bind(description)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Deterministic advisory lock key for a (user, ticker) pair: the first
/// 8 bytes of the user's UUID XOR'd with a hash of the ticker string.
fn compute_lock_key(user_id: Uuid, ticker: &str) -> i64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let uuid_bytes = user_id.as_bytes();
    let uuid_part = i64::from_le_bytes([
        uuid_bytes[0],
        uuid_bytes[1],
        uuid_bytes[2],
        uuid_bytes[3],
        uuid_bytes[4],
        uuid_bytes[5],
        uuid_bytes[6],
        uuid_bytes[7],
    ]);

    let mut hasher = DefaultHasher::new();
    ticker.hash(&mut hasher);
    let ticker_hash = hasher.finish() as i64;

    uuid_part ^ ticker_hash
}

async fn retry<F, Fut, T>(mut op: F) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(LedgerError::Database(e)) if is_retryable(&e) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(LedgerError::Overloaded);
                }
                tokio::time::sleep(Duration::from_millis(RETRY_BASE_MS * attempt as u64)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_retryable(err: &sqlx::Error) -> bool {
    matches!(
        err.as_database_error().and_then(|e| e.code()).as_deref(),
        Some("40001") | Some("40P01")
    )
}
