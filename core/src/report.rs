use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A handle for a user's monthly trade report. Generation, CSV
/// rendering, and object-storage upload are out of scope; this models
/// only the identity of a report a future job would produce.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub user_id: Uuid,
    pub year: i32,
    pub month: u32,
    pub object_key: String,
    pub generated_at: Option<DateTime<Utc>>,
    pub row_count: Option<u64>,
}

/// Columns a generated report's CSV would carry, for callers that need
/// to know the shape without this crate producing the file itself.
pub const COLUMNS: [&str; 8] = [
    "trade_id",
    "order_id",
    "instrument",
    "side",
    "quantity",
    "price",
    "total_amount",
    "executed_at",
];

impl Report {
    pub fn pending(user_id: Uuid, year: i32, month: u32) -> Self {
        Self {
            user_id,
            year,
            month,
            object_key: format!("reports/{user_id}/{year:04}-{month:02}.csv"),
            generated_at: None,
            row_count: None,
        }
    }
}
