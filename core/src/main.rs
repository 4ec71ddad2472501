use std::env;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use rublex::matching::MatchingEngine;
use rublex::models::User;
use rublex::routes::{admin_routes, auth_routes, public_routes, user_routes};
use rublex::{config::Config, db, scheduler, AppState};

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rublex=debug".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    let config = Config::from_env();

    tracing::info!("Connecting to database...");
    let pool = db::create_pool(&config.database_url).await?;

    tracing::info!("Running migrations...");
    db::run_migrations(&pool).await?;

    User::bootstrap_admin(&pool, &config.admin_api_key).await?;
    scheduler::spawn_balance_audit(pool.clone());

    let state = AppState {
        pool: pool.clone(),
        engine: Arc::new(MatchingEngine::new(pool)),
    };

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api/v1/public", public_routes().merge(auth_routes()))
        .nest(
            "/api/v1",
            user_routes().layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .nest(
            "/api/v1/admin",
            admin_routes().layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        .layer({
            use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
            use axum::http::Method;

            let allowed_headers = [AUTHORIZATION, CONTENT_TYPE, ACCEPT];
            let allowed_methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS];

            if let Ok(origins) = env::var("CORS_ALLOWED_ORIGINS") {
                let allowed: Vec<HeaderValue> = origins
                    .split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect();
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods(allowed_methods)
                    .allow_headers(allowed_headers)
            } else {
                CorsLayer::new()
                    .allow_origin(tower_http::cors::Any)
                    .allow_methods(allowed_methods)
                    .allow_headers(allowed_headers)
            }
        })
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("rublex listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string() })
}

/// Looks up the opaque `TOKEN <api_key>` header and attaches the matching
/// user as a request extension. There is no session or expiry: the token
/// is the api_key itself, valid until the user is deleted.
async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(unauthorized)?;

    let api_key = auth_header.strip_prefix("TOKEN ").ok_or_else(unauthorized)?;

    let user = User::find_by_api_key(&state.pool, api_key)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to look up user by api key");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse { error: "internal error".into() }),
            )
        })?
        .ok_or_else(unauthorized)?;

    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

fn unauthorized() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse { error: "missing or malformed Authorization header".into() }),
    )
}
