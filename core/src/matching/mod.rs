use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use rublex_engine::{Fill as EngineFill, OrderBook, Side as EngineSide};

use crate::models::instrument::{self, QUOTE_TICKER};
use crate::models::order::{self, Direction, Order, OrderError, OrderType};
use crate::models::{ledger, trade};

fn side_of(direction: Direction) -> EngineSide {
    match direction {
        Direction::Buy => EngineSide::Bid,
        Direction::Sell => EngineSide::Ask,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FillSummary {
    pub trade_id: Uuid,
    pub maker_order_id: Uuid,
    pub price: i64,
    pub qty: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub fills: Vec<FillSummary>,
}

/// Owns one `tokio::Mutex<OrderBook>` per admitted instrument — the
/// "single serializing lock per instrument" that makes matching,
/// placement, and cancellation linearizable within an instrument while
/// letting unrelated instruments proceed fully in parallel.
pub struct MatchingEngine {
    pool: PgPool,
    books: RwLock<HashMap<String, Arc<Mutex<OrderBook>>>>,
}

impl MatchingEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            books: RwLock::new(HashMap::new()),
        }
    }

    async fn book_for(&self, ticker: &str) -> Arc<Mutex<OrderBook>> {
        if let Some(book) = self.books.read().await.get(ticker) {
            return book.clone();
        }
        let mut books = self.books.write().await;
        books
            .entry(ticker.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new())))
            .clone()
    }

    async fn require_instrument(&self, ticker: &str) -> Result<(), OrderError> {
        instrument::get(&self.pool, ticker)
            .await?
            .ok_or_else(|| OrderError::InstrumentNotFound(ticker.to_string()))?;
        Ok(())
    }

    pub async fn place_limit(
        &self,
        user_id: Uuid,
        ticker: &str,
        direction: Direction,
        price: i64,
        qty: i64,
    ) -> Result<PlacedOrder, OrderError> {
        self.require_instrument(ticker).await?;

        let book = self.book_for(ticker).await;
        let mut book = book.lock().await;

        let (lock_ticker, lock_amount): (&str, i64) = match direction {
            Direction::Buy => (QUOTE_TICKER, price * qty),
            Direction::Sell => (ticker, qty),
        };

        let order_id = Uuid::new_v4();
        let order = order::insert_with_lock(
            &self.pool,
            order_id,
            user_id,
            ticker,
            direction,
            OrderType::Limit,
            Some(price),
            Some(price),
            qty,
            lock_ticker,
            lock_amount,
        )
        .await?;

        let (engine_fills, remaining) =
            book.match_incoming(side_of(direction), qty, Some(price));

        let fills = self.settle_fills(&order, &engine_fills).await?;

        if remaining > 0 {
            book.insert_resting(order_id, side_of(direction), price, remaining);
        }

        let order = order::get_by_id(&self.pool, order_id)
            .await?
            .ok_or(OrderError::NotFound)?;

        Ok(PlacedOrder { order, fills })
    }

    pub async fn place_market(
        &self,
        user_id: Uuid,
        ticker: &str,
        direction: Direction,
        qty: i64,
    ) -> Result<PlacedOrder, OrderError> {
        self.require_instrument(ticker).await?;

        let book = self.book_for(ticker).await;
        let mut book = book.lock().await;

        let probe = book.probe_market_liquidity(side_of(direction), qty);
        if probe.available < qty {
            return Err(OrderError::InsufficientLiquidity);
        }
        let worst_price = probe
            .worst_price
            .expect("available liquidity implies a worst price");

        let (lock_ticker, lock_amount): (&str, i64) = match direction {
            Direction::Buy => (QUOTE_TICKER, worst_price * qty),
            Direction::Sell => (ticker, qty),
        };

        let order_id = Uuid::new_v4();
        let order = order::insert_with_lock(
            &self.pool,
            order_id,
            user_id,
            ticker,
            direction,
            OrderType::Market,
            None,
            Some(worst_price),
            qty,
            lock_ticker,
            lock_amount,
        )
        .await?;

        let (engine_fills, remaining) = book.match_incoming(side_of(direction), qty, None);
        debug_assert_eq!(
            remaining, 0,
            "liquidity probe and match ran under the same book lock"
        );

        let fills = self.settle_fills(&order, &engine_fills).await?;

        let order = order::get_by_id(&self.pool, order_id)
            .await?
            .ok_or(OrderError::NotFound)?;

        Ok(PlacedOrder { order, fills })
    }

    /// Settle every fill the book produced for `taker`, one trade
    /// transaction at a time, in the order the book matched them. The
    /// per-instrument book lock is held for the whole call, so no other
    /// order on this instrument can interleave between fills.
    async fn settle_fills(
        &self,
        taker: &Order,
        engine_fills: &[EngineFill],
    ) -> Result<Vec<FillSummary>, OrderError> {
        let mut summaries = Vec::with_capacity(engine_fills.len());

        for fill in engine_fills {
            let maker = order::get_by_id(&self.pool, fill.maker_order_id)
                .await?
                .ok_or(OrderError::NotFound)?;

            let (buy_order, sell_order) = match taker.direction {
                Direction::Buy => (taker, &maker),
                Direction::Sell => (&maker, taker),
            };
            let buyer_lock_price = buy_order
                .lock_price
                .or(buy_order.price)
                .expect("a buy order always has a lock price by the time it can fill");

            let trade_id = Uuid::new_v4();
            ledger::settle_trade(
                &self.pool,
                QUOTE_TICKER,
                buy_order.user_id,
                sell_order.user_id,
                &taker.ticker,
                fill.price,
                fill.qty,
                buyer_lock_price,
                trade_id,
            )
            .await?;

            order::add_fill(&self.pool, taker.id, fill.qty).await?;
            order::add_fill(&self.pool, fill.maker_order_id, fill.qty).await?;

            trade::record(
                &self.pool,
                trade_id,
                &taker.ticker,
                buy_order.id,
                sell_order.id,
                buy_order.user_id,
                sell_order.user_id,
                fill.price,
                fill.qty,
            )
            .await?;

            summaries.push(FillSummary {
                trade_id,
                maker_order_id: fill.maker_order_id,
                price: fill.price,
                qty: fill.qty,
            });
        }

        Ok(summaries)
    }

    pub async fn cancel(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, OrderError> {
        let existing = order::get_by_id(&self.pool, order_id)
            .await?
            .ok_or(OrderError::NotFound)?;
        if existing.user_id != user_id {
            return Err(OrderError::NotFound);
        }

        let book = self.book_for(&existing.ticker).await;
        let mut book = book.lock().await;

        let cancelled = order::cancel(&self.pool, user_id, order_id, QUOTE_TICKER).await?;
        book.cancel(order_id);

        Ok(cancelled)
    }

    pub async fn snapshot(&self, ticker: &str, depth: usize) -> (Vec<(i64, i64)>, Vec<(i64, i64)>) {
        let book = self.book_for(ticker).await;
        let book = book.lock().await;
        book.snapshot(depth)
    }

    /// Pull every resting order for a delisted instrument out of the
    /// book and release its lock. Called by admin instrument deletion.
    pub async fn delist(&self, ticker: &str) -> Result<Vec<Order>, OrderError> {
        let book = self.book_for(ticker).await;
        let mut book = book.lock().await;
        book.drain_all();
        order::cancel_all_for_ticker(&self.pool, ticker, QUOTE_TICKER).await
    }
}
