//! Batch ledger models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A received lot of one medicine at one center.
///
/// Batches are never deleted. `remaining_quantity` only ever goes down, and a
/// depleted batch stays in the ledger for history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batch {
    pub id: Uuid,
    /// Insertion sequence, used to break ties between equal expiry dates
    pub ledger_seq: i64,
    pub center_id: Uuid,
    pub medicine_id: Uuid,
    pub receipt_id: Option<Uuid>,
    pub batch_code: String,
    pub initial_quantity: i64,
    pub remaining_quantity: i64,
    pub expiry_date: Option<NaiveDate>,
    pub received_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// A batch without an expiry date never expires
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.expiry_date.is_some_and(|expiry| expiry < today)
    }

    pub fn is_depleted(&self) -> bool {
        self.remaining_quantity == 0
    }
}

/// Which batches a ledger listing should return
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchFilter {
    #[serde(default)]
    pub include_depleted: bool,
    #[serde(default)]
    pub include_expired: bool,
}

impl BatchFilter {
    pub fn all() -> Self {
        Self {
            include_depleted: true,
            include_expired: true,
        }
    }

    pub fn matches(&self, batch: &Batch, today: NaiveDate) -> bool {
        (self.include_depleted || !batch.is_depleted())
            && (self.include_expired || !batch.is_expired(today))
    }
}

/// Length of generated batch codes
pub const BATCH_CODE_LENGTH: usize = 10;

/// Generate an opaque batch code from a random UUID.
///
/// Uniqueness is enforced by the database; a collision surfaces as a
/// constraint violation.
pub fn generate_batch_code() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(BATCH_CODE_LENGTH)
        .collect::<String>()
        .to_uppercase()
}
