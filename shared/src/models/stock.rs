//! Stock aggregate models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cached current stock for a (center, medicine) pair.
///
/// Always equal to the sum of `remaining_quantity` over the pair's batches;
/// it is rebuilt by summation, never adjusted incrementally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockAggregate {
    pub center_id: Uuid,
    pub medicine_id: Uuid,
    pub total_quantity: i64,
    pub last_updated: DateTime<Utc>,
}

/// A pair whose cached total disagrees with its batches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AggregateDrift {
    pub center_id: Uuid,
    pub medicine_id: Uuid,
    pub cached_quantity: i64,
    pub ledger_quantity: i64,
}

impl AggregateDrift {
    pub fn difference(&self) -> i64 {
        self.cached_quantity - self.ledger_quantity
    }
}
