use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::{Role, User};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    name: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    id: String,
    name: String,
    role: Role,
    api_key: String,
}

impl From<User> for UserResponse {
    fn from(u: User) -> Self {
        Self {
            id: u.id.to_string(),
            name: u.name,
            role: u.role,
            api_key: u.api_key,
        }
    }
}

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/register", post(register))
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let name = req.name.trim();
    if name.len() < 3 {
        return Err(ApiError::BadRequest("name must be at least 3 characters".into()));
    }

    let user = User::register(&state.pool, name).await?;
    Ok(Json(user.into()))
}
