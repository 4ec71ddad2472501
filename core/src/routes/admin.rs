use axum::{
    extract::{Path, State},
    routing::{delete, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{instrument, ledger, order, EntryType, User};
use crate::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/instrument", post(admit_instrument))
        .route("/instrument/:ticker", delete(delist_instrument))
        .route("/balance/deposit", post(deposit))
        .route("/balance/withdraw", post(withdraw))
        .route("/user/:user_id", delete(delete_user))
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

fn require_admin(user: &User) -> Result<(), ApiError> {
    if !user.is_admin() {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct AdmitInstrumentRequest {
    name: String,
    ticker: String,
}

async fn admit_instrument(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<AdmitInstrumentRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_admin(&user)?;
    instrument::admit(&state.pool, &req.ticker, &req.name).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn delist_instrument(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(ticker): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_admin(&user)?;
    state.engine.delist(&ticker).await?;
    instrument::delete(&state.pool, &ticker).await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
struct BalanceOperationRequest {
    user_id: Uuid,
    ticker: String,
    amount: i64,
}

async fn deposit(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<BalanceOperationRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_admin(&user)?;
    if req.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    ledger::credit(
        &state.pool,
        req.user_id,
        &req.ticker,
        req.amount,
        EntryType::Deposit,
        None,
        Some("admin deposit"),
    )
    .await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn withdraw(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(req): Json<BalanceOperationRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    require_admin(&user)?;
    if req.amount <= 0 {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }
    ledger::debit(
        &state.pool,
        req.user_id,
        &req.ticker,
        req.amount,
        EntryType::Withdrawal,
        None,
        Some("admin withdrawal"),
    )
    .await?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Serialize)]
struct DeletedUserResponse {
    id: Uuid,
    name: String,
}

async fn delete_user(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(user_id): Path<String>,
) -> Result<Json<DeletedUserResponse>, ApiError> {
    require_admin(&user)?;

    let user_id: Uuid = user_id
        .parse()
        .map_err(|_| ApiError::UnprocessableEntity("malformed user id".into()))?;

    let target = User::find_by_id(&state.pool, user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;

    let resting = order::list_for_user(&state.pool, user_id, i64::MAX, 0).await?;
    for o in resting.into_iter().filter(|o| o.is_resting_eligible()) {
        state.engine.cancel(user_id, o.id).await?;
    }

    User::delete(&state.pool, user_id).await?;
    Ok(Json(DeletedUserResponse { id: target.id, name: target.name }))
}
