//! First-Expiring-First-Out consumption planning
//!
//! The planner works on a snapshot of a pair's batches and decides how much
//! to take from each one. It never touches storage: the backend locks the
//! batches, plans against the locked snapshot and then writes the plan back.
//!
//! Ordering rules:
//! - earliest `expiry_date` first
//! - batches without an expiry date never expire and are consumed last
//! - equal expiry dates fall back to `ledger_seq`, so older receipts go first

use std::cmp::Ordering;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::Batch;

/// The part of a batch the planner needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLevel {
    pub batch_id: Uuid,
    pub ledger_seq: i64,
    pub expiry_date: Option<NaiveDate>,
    pub remaining_quantity: i64,
}

impl From<&Batch> for BatchLevel {
    fn from(batch: &Batch) -> Self {
        Self {
            batch_id: batch.id,
            ledger_seq: batch.ledger_seq,
            expiry_date: batch.expiry_date,
            remaining_quantity: batch.remaining_quantity,
        }
    }
}

/// Quantity taken from a single batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub batch_id: Uuid,
    pub taken: i64,
    pub remaining_before: i64,
    pub remaining_after: i64,
}

/// Result of planning a consumption against a batch snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionPlan {
    pub requested: i64,
    /// Total remaining across the snapshot before consumption
    pub available: i64,
    /// Deductions in the order they are applied
    pub deductions: Vec<Deduction>,
}

impl ConsumptionPlan {
    pub fn total_taken(&self) -> i64 {
        self.deductions.iter().map(|d| d.taken).sum()
    }

    /// Stock left for the pair once the plan is applied
    pub fn available_after(&self) -> i64 {
        self.available - self.total_taken()
    }

    /// Batches the plan empties completely
    pub fn depleted_batches(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.deductions
            .iter()
            .filter(|d| d.remaining_after == 0)
            .map(|d| d.batch_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FefoError {
    #[error("consumption quantity must not be negative, got {0}")]
    InvalidQuantity(i64),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// The ordered walk ran out of batches after the availability check
    /// passed. Only reachable if the snapshot is inconsistent.
    #[error("FEFO walk left {unallocated} of {requested} units unallocated")]
    Shortfall { requested: i64, unallocated: i64 },
}

/// Total ordering used to walk batches
pub fn fefo_order(a: &BatchLevel, b: &BatchLevel) -> Ordering {
    let by_expiry = match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_expiry.then_with(|| a.ledger_seq.cmp(&b.ledger_seq))
}

/// Sort batches into consumption order
pub fn sort_fefo(batches: &mut [BatchLevel]) {
    batches.sort_by(fefo_order);
}

/// Plan `quantity` units of consumption against `batches`.
///
/// Depleted batches in the snapshot are ignored. The availability check and
/// the walk run against the same slice, so a successful check guarantees the
/// walk can be satisfied.
pub fn plan_consumption(
    batches: &[BatchLevel],
    quantity: i64,
) -> Result<ConsumptionPlan, FefoError> {
    if quantity < 0 {
        return Err(FefoError::InvalidQuantity(quantity));
    }

    let mut ordered: Vec<BatchLevel> = batches
        .iter()
        .filter(|b| b.remaining_quantity > 0)
        .cloned()
        .collect();

    let available: i64 = ordered.iter().map(|b| b.remaining_quantity).sum();
    if quantity > available {
        return Err(FefoError::InsufficientStock {
            requested: quantity,
            available,
        });
    }

    sort_fefo(&mut ordered);
    let deductions = allocate_in_order(&ordered, quantity)?;

    Ok(ConsumptionPlan {
        requested: quantity,
        available,
        deductions,
    })
}

/// Walk already-ordered batches and take `quantity` units.
///
/// Does no availability pre-check: running out of batches is reported as
/// [`FefoError::Shortfall`].
pub fn allocate_in_order(
    ordered: &[BatchLevel],
    quantity: i64,
) -> Result<Vec<Deduction>, FefoError> {
    let mut remaining = quantity;
    let mut deductions = Vec::new();

    for batch in ordered {
        if remaining == 0 {
            break;
        }
        if batch.remaining_quantity <= 0 {
            continue;
        }

        let taken = if batch.remaining_quantity >= remaining {
            remaining
        } else {
            batch.remaining_quantity
        };
        remaining -= taken;

        deductions.push(Deduction {
            batch_id: batch.batch_id,
            taken,
            remaining_before: batch.remaining_quantity,
            remaining_after: batch.remaining_quantity - taken,
        });
    }

    if remaining > 0 {
        return Err(FefoError::Shortfall {
            requested: quantity,
            unallocated: remaining,
        });
    }

    Ok(deductions)
}
