//! Batch ledger and stock aggregate cache
//!
//! The ledger owns quantity truth. `stock_levels` is a cache of
//! `SUM(stock_batches.remaining_quantity)` per (center, medicine) pair and is
//! always rebuilt by summation inside the same transaction as the batch
//! mutation that touched the pair.
//!
//! Locking: every mutation takes the pair's `stock_levels` row lock through
//! [`LedgerService::lock_aggregate`] before touching batches. That serializes
//! writers on one pair and leaves other pairs free to proceed.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use shared::{generate_batch_code, AggregateDrift, Batch, BatchFilter, StockAggregate};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{unique_violation, AppError, AppResult};

/// Ledger service for batches and cached stock totals
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
    clock: Arc<dyn Clock>,
}

/// A batch about to be appended to the ledger
#[derive(Debug, Clone)]
pub struct NewBatch {
    pub center_id: Uuid,
    pub medicine_id: Uuid,
    pub receipt_id: Option<Uuid>,
    pub quantity: i64,
    pub expiry_date: Option<NaiveDate>,
    pub received_date: NaiveDate,
    /// Generated when absent
    pub batch_code: Option<String>,
}

/// Row for batch queries
#[derive(Debug, FromRow)]
struct BatchRow {
    id: Uuid,
    ledger_seq: i64,
    center_id: Uuid,
    medicine_id: Uuid,
    receipt_id: Option<Uuid>,
    batch_code: String,
    initial_quantity: i64,
    remaining_quantity: i64,
    expiry_date: Option<NaiveDate>,
    received_date: NaiveDate,
    created_at: DateTime<Utc>,
}

impl From<BatchRow> for Batch {
    fn from(row: BatchRow) -> Self {
        Self {
            id: row.id,
            ledger_seq: row.ledger_seq,
            center_id: row.center_id,
            medicine_id: row.medicine_id,
            receipt_id: row.receipt_id,
            batch_code: row.batch_code,
            initial_quantity: row.initial_quantity,
            remaining_quantity: row.remaining_quantity,
            expiry_date: row.expiry_date,
            received_date: row.received_date,
            created_at: row.created_at,
        }
    }
}

/// Row for stock level queries
#[derive(Debug, FromRow)]
struct StockLevelRow {
    center_id: Uuid,
    medicine_id: Uuid,
    total_quantity: i64,
    last_updated: DateTime<Utc>,
}

impl From<StockLevelRow> for StockAggregate {
    fn from(row: StockLevelRow) -> Self {
        Self {
            center_id: row.center_id,
            medicine_id: row.medicine_id,
            total_quantity: row.total_quantity,
            last_updated: row.last_updated,
        }
    }
}

/// Row for drift query
#[derive(Debug, FromRow)]
struct DriftRow {
    center_id: Uuid,
    medicine_id: Uuid,
    cached_quantity: i64,
    ledger_quantity: i64,
}

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(db: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Append a batch inside the caller's transaction.
    ///
    /// The caller must already hold the pair's aggregate lock and must
    /// recompute the aggregate before committing.
    pub async fn append_batch(&self, conn: &mut PgConnection, batch: NewBatch) -> AppResult<Batch> {
        shared::validate_received_quantity(batch.quantity)
            .map_err(|msg| AppError::validation("quantity", msg))?;
        shared::validate_expiry(batch.expiry_date, batch.received_date)
            .map_err(|msg| AppError::validation("expiry_date", msg))?;

        let batch_code = match batch.batch_code {
            Some(code) => {
                shared::validate_batch_code(&code)
                    .map_err(|msg| AppError::validation("batch_code", msg))?;
                code
            }
            None => generate_batch_code(),
        };

        let row = sqlx::query_as::<_, BatchRow>(
            r#"
            INSERT INTO stock_batches (
                center_id, medicine_id, receipt_id, batch_code,
                initial_quantity, remaining_quantity, expiry_date, received_date, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $5, $6, $7, $8)
            RETURNING id, ledger_seq, center_id, medicine_id, receipt_id, batch_code,
                      initial_quantity, remaining_quantity, expiry_date, received_date, created_at
            "#,
        )
        .bind(batch.center_id)
        .bind(batch.medicine_id)
        .bind(batch.receipt_id)
        .bind(&batch_code)
        .bind(batch.quantity)
        .bind(batch.expiry_date)
        .bind(batch.received_date)
        .bind(self.clock.now())
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| match unique_violation(&err).as_deref() {
            Some("stock_batches_batch_code_key") => {
                AppError::DuplicateEntry("batch_code".to_string())
            }
            _ => AppError::from(err),
        })?;

        tracing::debug!(
            batch_id = %row.id,
            batch_code = %row.batch_code,
            quantity = row.initial_quantity,
            "Batch appended to ledger"
        );

        Ok(row.into())
    }

    /// Take the row lock on a pair's aggregate, creating the row at zero if
    /// it does not exist yet. Returns the cached total.
    pub async fn lock_aggregate(
        &self,
        conn: &mut PgConnection,
        center_id: Uuid,
        medicine_id: Uuid,
    ) -> AppResult<i64> {
        sqlx::query(
            r#"
            INSERT INTO stock_levels (center_id, medicine_id, total_quantity, last_updated)
            VALUES ($1, $2, 0, $3)
            ON CONFLICT (center_id, medicine_id) DO NOTHING
            "#,
        )
        .bind(center_id)
        .bind(medicine_id)
        .bind(self.clock.now())
        .execute(&mut *conn)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT total_quantity FROM stock_levels
            WHERE center_id = $1 AND medicine_id = $2
            FOR UPDATE
            "#,
        )
        .bind(center_id)
        .bind(medicine_id)
        .fetch_one(&mut *conn)
        .await?;

        Ok(total)
    }

    /// Re-sum the pair's batches and store the result in `stock_levels`.
    pub async fn recompute_aggregate(
        &self,
        conn: &mut PgConnection,
        center_id: Uuid,
        medicine_id: Uuid,
    ) -> AppResult<StockAggregate> {
        let row = sqlx::query_as::<_, StockLevelRow>(
            r#"
            INSERT INTO stock_levels (center_id, medicine_id, total_quantity, last_updated)
            SELECT $1, $2, COALESCE(SUM(remaining_quantity), 0)::BIGINT, $3
            FROM stock_batches
            WHERE center_id = $1 AND medicine_id = $2
            ON CONFLICT (center_id, medicine_id) DO UPDATE
            SET total_quantity = EXCLUDED.total_quantity,
                last_updated = EXCLUDED.last_updated
            RETURNING center_id, medicine_id, total_quantity, last_updated
            "#,
        )
        .bind(center_id)
        .bind(medicine_id)
        .bind(self.clock.now())
        .fetch_one(&mut *conn)
        .await?;

        Ok(row.into())
    }

    /// Current stock for a pair. A pair that never received stock reports zero.
    pub async fn get_stock(&self, center_id: Uuid, medicine_id: Uuid) -> AppResult<StockAggregate> {
        let row = sqlx::query_as::<_, StockLevelRow>(
            r#"
            SELECT center_id, medicine_id, total_quantity, last_updated
            FROM stock_levels
            WHERE center_id = $1 AND medicine_id = $2
            "#,
        )
        .bind(center_id)
        .bind(medicine_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(StockAggregate::from).unwrap_or_else(|| StockAggregate {
            center_id,
            medicine_id,
            total_quantity: 0,
            last_updated: self.clock.now(),
        }))
    }

    /// Batches for a pair in consumption order
    pub async fn list_batches(
        &self,
        center_id: Uuid,
        medicine_id: Uuid,
        filter: BatchFilter,
    ) -> AppResult<Vec<Batch>> {
        let rows = sqlx::query_as::<_, BatchRow>(
            r#"
            SELECT id, ledger_seq, center_id, medicine_id, receipt_id, batch_code,
                   initial_quantity, remaining_quantity, expiry_date, received_date, created_at
            FROM stock_batches
            WHERE center_id = $1 AND medicine_id = $2
              AND ($3 OR remaining_quantity > 0)
              AND ($4 OR expiry_date IS NULL OR expiry_date >= $5)
            ORDER BY expiry_date ASC NULLS LAST, ledger_seq ASC
            "#,
        )
        .bind(center_id)
        .bind(medicine_id)
        .bind(filter.include_depleted)
        .bind(filter.include_expired)
        .bind(self.clock.today())
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Batch::from).collect())
    }

    /// Aggregates at or below `threshold`, lowest first
    pub async fn low_stock(&self, threshold: i64) -> AppResult<Vec<StockAggregate>> {
        let rows = sqlx::query_as::<_, StockLevelRow>(
            r#"
            SELECT center_id, medicine_id, total_quantity, last_updated
            FROM stock_levels
            WHERE total_quantity <= $1
            ORDER BY total_quantity ASC, center_id, medicine_id
            "#,
        )
        .bind(threshold)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(StockAggregate::from).collect())
    }

    /// Pairs whose cached total disagrees with the sum of their batches
    pub async fn audit_aggregates(&self) -> AppResult<Vec<AggregateDrift>> {
        let rows = sqlx::query_as::<_, DriftRow>(
            r#"
            SELECT center_id, medicine_id,
                   COALESCE(sl.total_quantity, 0)::BIGINT as cached_quantity,
                   COALESCE(b.total, 0)::BIGINT as ledger_quantity
            FROM stock_levels sl
            FULL OUTER JOIN (
                SELECT center_id, medicine_id, SUM(remaining_quantity) as total
                FROM stock_batches
                GROUP BY center_id, medicine_id
            ) b USING (center_id, medicine_id)
            WHERE COALESCE(sl.total_quantity, 0) <> COALESCE(b.total, 0)
            ORDER BY center_id, medicine_id
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| AggregateDrift {
                center_id: r.center_id,
                medicine_id: r.medicine_id,
                cached_quantity: r.cached_quantity,
                ledger_quantity: r.ledger_quantity,
            })
            .collect())
    }

    /// Recompute every drifted aggregate, one transaction per pair.
    /// Returns the drift found before repair.
    pub async fn rebuild_aggregates(&self) -> AppResult<Vec<AggregateDrift>> {
        let drifted = self.audit_aggregates().await?;

        for drift in &drifted {
            let mut tx = self.db.begin().await?;
            self.lock_aggregate(&mut tx, drift.center_id, drift.medicine_id)
                .await?;
            let stock = self
                .recompute_aggregate(&mut tx, drift.center_id, drift.medicine_id)
                .await?;
            tx.commit().await?;

            tracing::warn!(
                center_id = %drift.center_id,
                medicine_id = %drift.medicine_id,
                cached = drift.cached_quantity,
                rebuilt = stock.total_quantity,
                "Rebuilt drifted stock aggregate"
            );
        }

        Ok(drifted)
    }
}
