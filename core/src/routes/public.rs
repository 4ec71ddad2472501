use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{trade, Instrument};
use crate::AppState;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/instrument", get(list_instruments))
        .route("/orderbook/:ticker", get(get_orderbook))
        .route("/transactions/:ticker", get(get_transactions))
}

#[derive(Debug, Serialize)]
struct InstrumentResponse {
    name: String,
    ticker: String,
}

impl From<Instrument> for InstrumentResponse {
    fn from(i: Instrument) -> Self {
        Self { name: i.name, ticker: i.ticker }
    }
}

async fn list_instruments(State(state): State<AppState>) -> Result<Json<Vec<InstrumentResponse>>, ApiError> {
    let instruments = crate::models::instrument::list(&state.pool).await?;
    Ok(Json(instruments.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Deserialize)]
struct DepthQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Level {
    price: i64,
    qty: i64,
}

#[derive(Debug, Serialize)]
struct OrderBookResponse {
    bid_levels: Vec<Level>,
    ask_levels: Vec<Level>,
}

async fn get_orderbook(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<DepthQuery>,
) -> Result<Json<OrderBookResponse>, ApiError> {
    crate::models::instrument::get(&state.pool, &ticker)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("instrument {ticker} is not admitted")))?;

    let limit = query.limit.unwrap_or(10).clamp(1, 25);
    let (bids, asks) = state.engine.snapshot(&ticker, limit).await;
    if bids.is_empty() && asks.is_empty() {
        return Err(ApiError::NotFound(format!("no resting orders for {ticker}")));
    }

    Ok(Json(OrderBookResponse {
        bid_levels: bids.into_iter().map(|(price, qty)| Level { price, qty }).collect(),
        ask_levels: asks.into_iter().map(|(price, qty)| Level { price, qty }).collect(),
    }))
}

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TransactionResponse {
    ticker: String,
    amount: i64,
    price: i64,
    timestamp: chrono::DateTime<chrono::Utc>,
}

async fn get_transactions(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<TransactionResponse>>, ApiError> {
    let limit = query.limit.unwrap_or(20).clamp(1, 25);
    let trades = trade::list_for_ticker(&state.pool, &ticker, limit).await?;
    Ok(Json(
        trades
            .into_iter()
            .map(|t| TransactionResponse {
                ticker: t.ticker,
                amount: t.qty * t.price,
                price: t.price,
                timestamp: t.created_at,
            })
            .collect(),
    ))
}
