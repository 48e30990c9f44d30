//! FEFO consumption engine
//!
//! Deducts a quantity from a pair's batches, soonest expiry first, and
//! recomputes the pair's aggregate. Only called from consumption recording;
//! it runs inside the caller's transaction and never commits.

use shared::{plan_consumption, BatchLevel, ConsumptionPlan, FefoError, StockAggregate};
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::LedgerService;

/// Applies consumption against the batch ledger
#[derive(Clone)]
pub struct ConsumptionEngine {
    ledger: LedgerService,
}

/// What a consumption did to the ledger
#[derive(Debug, Clone)]
pub struct ConsumptionOutcome {
    pub plan: ConsumptionPlan,
    /// Aggregate after recomputation
    pub stock: StockAggregate,
}

/// Row for locked batch snapshot
#[derive(Debug, FromRow)]
struct BatchLevelRow {
    id: Uuid,
    ledger_seq: i64,
    expiry_date: Option<chrono::NaiveDate>,
    remaining_quantity: i64,
}

impl From<BatchLevelRow> for BatchLevel {
    fn from(row: BatchLevelRow) -> Self {
        Self {
            batch_id: row.id,
            ledger_seq: row.ledger_seq,
            expiry_date: row.expiry_date,
            remaining_quantity: row.remaining_quantity,
        }
    }
}

impl ConsumptionEngine {
    /// Create a new ConsumptionEngine instance
    pub fn new(ledger: LedgerService) -> Self {
        Self { ledger }
    }

    /// Consume `quantity` units for a pair.
    ///
    /// The availability check and the deductions use the same locked
    /// snapshot, so two concurrent calls on one pair cannot both pass the
    /// check against the same stock.
    pub async fn consume(
        &self,
        conn: &mut PgConnection,
        center_id: Uuid,
        medicine_id: Uuid,
        quantity: i64,
    ) -> AppResult<ConsumptionOutcome> {
        shared::validate_consumed_quantity(quantity)
            .map_err(|msg| AppError::validation("quantity_used", msg))?;

        self.ledger
            .lock_aggregate(&mut *conn, center_id, medicine_id)
            .await?;

        let snapshot: Vec<BatchLevel> = sqlx::query_as::<_, BatchLevelRow>(
            r#"
            SELECT id, ledger_seq, expiry_date, remaining_quantity
            FROM stock_batches
            WHERE center_id = $1 AND medicine_id = $2 AND remaining_quantity > 0
            ORDER BY expiry_date ASC NULLS LAST, ledger_seq ASC
            FOR UPDATE
            "#,
        )
        .bind(center_id)
        .bind(medicine_id)
        .fetch_all(&mut *conn)
        .await?
        .into_iter()
        .map(BatchLevel::from)
        .collect();

        let plan = match plan_consumption(&snapshot, quantity) {
            Ok(plan) => plan,
            Err(err @ FefoError::Shortfall { .. }) => {
                tracing::error!(
                    %center_id,
                    %medicine_id,
                    quantity,
                    error = %err,
                    "FEFO walk could not satisfy a pre-checked quantity"
                );
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        for deduction in &plan.deductions {
            let result = sqlx::query(
                r#"
                UPDATE stock_batches
                SET remaining_quantity = $1
                WHERE id = $2 AND remaining_quantity = $3
                "#,
            )
            .bind(deduction.remaining_after)
            .bind(deduction.batch_id)
            .bind(deduction.remaining_before)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() != 1 {
                let message = format!(
                    "batch {} changed under lock (expected remaining {})",
                    deduction.batch_id, deduction.remaining_before
                );
                tracing::error!(%center_id, %medicine_id, "{}", message);
                return Err(AppError::ConsistencyViolation(message));
            }
        }

        let stock = self
            .ledger
            .recompute_aggregate(&mut *conn, center_id, medicine_id)
            .await?;

        if stock.total_quantity != plan.available_after() {
            let message = format!(
                "aggregate {} does not match ledger remainder {} after consumption",
                stock.total_quantity,
                plan.available_after()
            );
            tracing::error!(%center_id, %medicine_id, "{}", message);
            return Err(AppError::ConsistencyViolation(message));
        }

        tracing::debug!(
            %center_id,
            %medicine_id,
            quantity,
            batches_touched = plan.deductions.len(),
            remaining = stock.total_quantity,
            "Consumed stock FEFO"
        );

        Ok(ConsumptionOutcome { plan, stock })
    }
}
