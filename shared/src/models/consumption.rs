//! Consumption records and the stock-health classifier

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A weekly usage report for one medicine at one center.
///
/// Unique per (period_start, period_end, medicine, center). The observation
/// is written once, right after the ledger has been consumed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsumptionRecord {
    pub id: Uuid,
    pub center_id: Uuid,
    pub medicine_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub quantity_used: i64,
    pub observation: Option<Observation>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stock health label derived from the aggregate after consumption
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    OutOfStock,
    LowStock,
    SufficientStock,
}

impl Observation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Observation::OutOfStock => "out of stock",
            Observation::LowStock => "low stock",
            Observation::SufficientStock => "sufficient stock",
        }
    }

    /// Classify a stock total under the given policy
    pub fn classify(total_quantity: i64, policy: &StockHealthPolicy) -> Self {
        if total_quantity <= 0 {
            Observation::OutOfStock
        } else if total_quantity <= policy.low_stock_threshold {
            Observation::LowStock
        } else {
            Observation::SufficientStock
        }
    }
}

impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Observation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "out of stock" => Ok(Observation::OutOfStock),
            "low stock" => Ok(Observation::LowStock),
            "sufficient stock" => Ok(Observation::SufficientStock),
            other => Err(format!("unknown observation: {}", other)),
        }
    }
}

/// Default upper bound (inclusive) of the "low stock" band
pub const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 10;

/// Thresholds used by the classifier.
///
/// The threshold is expressed in the medicine's own unit, so the same value
/// means different things for tablets and litres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockHealthPolicy {
    pub low_stock_threshold: i64,
}

impl Default for StockHealthPolicy {
    fn default() -> Self {
        Self {
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
        }
    }
}
