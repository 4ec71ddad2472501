pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod models;
pub mod report;
pub mod routes;
pub mod scheduler;

use std::sync::Arc;

use sqlx::PgPool;

use matching::MatchingEngine;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub engine: Arc<MatchingEngine>,
}
