//! Receipt intake models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The fact that a quantity of medicine arrived at a center
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Receipt {
    pub id: Uuid,
    pub center_id: Uuid,
    pub medicine_id: Uuid,
    pub quantity_received: i64,
    pub expiry_date: Option<NaiveDate>,
    pub received_date: NaiveDate,
    /// Ledger batch created for this receipt
    pub batch_id: Uuid,
    pub batch_code: String,
    pub created_at: DateTime<Utc>,
}
