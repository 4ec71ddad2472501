use sqlx::PgPool;
use std::time::Duration;

/// Background housekeeping, spawned once at boot. The trade tape is
/// append-only by design, so there is nothing to periodically clear.
/// This instead periodically logs orphaned zero-balance rows, which
/// should never exist (every mutation path deletes them inline) but
/// are cheap to watch for.
pub fn spawn_balance_audit(pool: PgPool) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match count_dead_balance_rows(&pool).await {
                Ok(0) => {}
                Ok(n) => tracing::warn!(count = n, "found zero-balance rows that should have been deleted"),
                Err(e) => tracing::error!(error = %e, "balance audit query failed"),
            }
        }
    });
}

async fn count_dead_balance_rows(pool: &PgPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM balances WHERE amount = 0 AND locked = 0")
        .fetch_one(pool)
        .await
}
