use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{balance, order, Direction, Order, OrderStatus, User};
use crate::AppState;

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/balance", get(get_balance))
        .route("/order", post(place_order).get(list_orders))
        .route("/order/:id", get(get_order).delete(cancel_order))
}

async fn get_balance(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<HashMap<String, i64>>, ApiError> {
    let balances = balance::get_for_user(&state.pool, user.id).await?;
    Ok(Json(balances.into_iter().map(|b| (b.ticker, b.amount)).collect()))
}

#[derive(Debug, Deserialize)]
struct PlaceOrderRequest {
    direction: Direction,
    ticker: String,
    qty: i64,
    price: Option<i64>,
}

#[derive(Debug, Serialize)]
struct PlaceOrderResponse {
    success: bool,
    order_id: Uuid,
}

async fn place_order(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<PlaceOrderRequest>,
) -> Result<Json<PlaceOrderResponse>, ApiError> {
    if req.qty <= 0 {
        return Err(ApiError::BadRequest("qty must be positive".into()));
    }

    let placed = match req.price {
        Some(price) => {
            if price <= 0 {
                return Err(ApiError::BadRequest("price must be positive".into()));
            }
            state
                .engine
                .place_limit(user.id, &req.ticker, req.direction, price, req.qty)
                .await?
        }
        None => {
            state
                .engine
                .place_market(user.id, &req.ticker, req.direction, req.qty)
                .await?
        }
    };

    Ok(Json(PlaceOrderResponse {
        success: true,
        order_id: placed.order.id,
    }))
}

#[derive(Debug, Serialize)]
struct OrderBody {
    direction: Direction,
    ticker: String,
    qty: i64,
    price: Option<i64>,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    id: Uuid,
    status: OrderStatus,
    user_id: Uuid,
    timestamp: DateTime<Utc>,
    body: OrderBody,
    filled: i64,
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        Self {
            id: o.id,
            status: o.status,
            user_id: o.user_id,
            timestamp: o.created_at,
            body: OrderBody {
                direction: o.direction,
                ticker: o.ticker,
                qty: o.qty,
                price: o.price,
            },
            filled: o.filled,
        }
    }
}

async fn list_orders(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = order::list_for_user(&state.pool, user.id, 100, 0).await?;
    Ok(Json(orders.into_iter().map(Into::into).collect()))
}

fn parse_order_id(id: &str) -> Result<Uuid, ApiError> {
    id.parse().map_err(|_| ApiError::UnprocessableEntity("malformed order id".into()))
}

async fn get_order(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = order::get(&state.pool, user.id, order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("order not found".into()))?;
    Ok(Json(order.into()))
}

#[derive(Debug, Serialize)]
struct CancelOrderResponse {
    success: bool,
}

async fn cancel_order(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<Json<CancelOrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    state.engine.cancel(user.id, order_id).await?;
    Ok(Json(CancelOrderResponse { success: true }))
}
