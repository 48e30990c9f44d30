//! Receipt intake: new stock arriving at a center

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use shared::Receipt;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::services::{LedgerService, NewBatch};

/// Receipt service for stock intake
#[derive(Clone)]
pub struct ReceiptService {
    db: PgPool,
    ledger: LedgerService,
    clock: Arc<dyn Clock>,
}

/// Input for receiving stock
#[derive(Debug, Deserialize, Validate)]
pub struct ReceiveInput {
    pub center_id: Uuid,
    pub medicine_id: Uuid,
    #[validate(range(min = 1, message = "Received quantity must be greater than 0"))]
    pub quantity: i64,
    pub expiry_date: Option<NaiveDate>,
    /// Defaults to today
    pub received_date: Option<NaiveDate>,
    /// Generated when absent
    #[validate(length(min = 4, max = 32, message = "Batch code must be 4-32 characters"))]
    pub batch_code: Option<String>,
}

/// Filter for listing receipts
#[derive(Debug, Default, Deserialize)]
pub struct ReceiptFilter {
    pub center_id: Option<Uuid>,
    pub medicine_id: Option<Uuid>,
    pub limit: Option<i64>,
}

/// Row for receipt queries
#[derive(Debug, FromRow)]
struct ReceiptRow {
    id: Uuid,
    center_id: Uuid,
    medicine_id: Uuid,
    quantity_received: i64,
    expiry_date: Option<NaiveDate>,
    received_date: NaiveDate,
    batch_id: Uuid,
    batch_code: String,
    created_at: DateTime<Utc>,
}

impl From<ReceiptRow> for Receipt {
    fn from(row: ReceiptRow) -> Self {
        Self {
            id: row.id,
            center_id: row.center_id,
            medicine_id: row.medicine_id,
            quantity_received: row.quantity_received,
            expiry_date: row.expiry_date,
            received_date: row.received_date,
            batch_id: row.batch_id,
            batch_code: row.batch_code,
            created_at: row.created_at,
        }
    }
}

impl ReceiptService {
    /// Create a new ReceiptService instance
    pub fn new(db: PgPool, ledger: LedgerService, clock: Arc<dyn Clock>) -> Self {
        Self { db, ledger, clock }
    }

    /// Receive stock: persist the receipt, append its batch and refresh the
    /// pair's aggregate in one transaction. Never consumes.
    pub async fn receive(&self, input: ReceiveInput) -> AppResult<Receipt> {
        input.validate()?;

        let received_date = input.received_date.unwrap_or_else(|| self.clock.today());
        shared::validate_expiry(input.expiry_date, received_date)
            .map_err(|msg| AppError::validation("expiry_date", msg))?;

        let mut tx = self.db.begin().await?;

        let (center_exists, medicine_exists) = sqlx::query_as::<_, (bool, bool)>(
            r#"
            SELECT EXISTS(SELECT 1 FROM medical_centers WHERE id = $1),
                   EXISTS(SELECT 1 FROM medicines WHERE id = $2)
            "#,
        )
        .bind(input.center_id)
        .bind(input.medicine_id)
        .fetch_one(&mut *tx)
        .await?;

        if !center_exists {
            return Err(AppError::NotFound("Medical center".to_string()));
        }
        if !medicine_exists {
            return Err(AppError::NotFound("Medicine".to_string()));
        }

        self.ledger
            .lock_aggregate(&mut tx, input.center_id, input.medicine_id)
            .await?;

        let (receipt_id, created_at) = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            INSERT INTO medicine_receipts (
                center_id, medicine_id, quantity_received, expiry_date, received_date, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, created_at
            "#,
        )
        .bind(input.center_id)
        .bind(input.medicine_id)
        .bind(input.quantity)
        .bind(input.expiry_date)
        .bind(received_date)
        .bind(self.clock.now())
        .fetch_one(&mut *tx)
        .await?;

        let batch = self
            .ledger
            .append_batch(
                &mut tx,
                NewBatch {
                    center_id: input.center_id,
                    medicine_id: input.medicine_id,
                    receipt_id: Some(receipt_id),
                    quantity: input.quantity,
                    expiry_date: input.expiry_date,
                    received_date,
                    batch_code: input.batch_code,
                },
            )
            .await?;

        let stock = self
            .ledger
            .recompute_aggregate(&mut tx, input.center_id, input.medicine_id)
            .await?;

        tx.commit().await?;

        tracing::info!(
            receipt_id = %receipt_id,
            center_id = %input.center_id,
            medicine_id = %input.medicine_id,
            quantity = input.quantity,
            batch_code = %batch.batch_code,
            total = stock.total_quantity,
            "Stock received"
        );

        Ok(Receipt {
            id: receipt_id,
            center_id: input.center_id,
            medicine_id: input.medicine_id,
            quantity_received: input.quantity,
            expiry_date: input.expiry_date,
            received_date,
            batch_id: batch.id,
            batch_code: batch.batch_code,
            created_at,
        })
    }

    /// Get a receipt by id
    pub async fn get_receipt(&self, receipt_id: Uuid) -> AppResult<Receipt> {
        let row = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT r.id, r.center_id, r.medicine_id, r.quantity_received, r.expiry_date,
                   r.received_date, b.id as batch_id, b.batch_code, r.created_at
            FROM medicine_receipts r
            JOIN stock_batches b ON b.receipt_id = r.id
            WHERE r.id = $1
            "#,
        )
        .bind(receipt_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Receipt".to_string()))?;

        Ok(row.into())
    }

    /// List receipts, newest first
    pub async fn list_receipts(&self, filter: &ReceiptFilter) -> AppResult<Vec<Receipt>> {
        if let Some(limit) = filter.limit {
            if limit <= 0 {
                return Err(AppError::validation("limit", "Limit must be greater than 0"));
            }
        }

        let rows = sqlx::query_as::<_, ReceiptRow>(
            r#"
            SELECT r.id, r.center_id, r.medicine_id, r.quantity_received, r.expiry_date,
                   r.received_date, b.id as batch_id, b.batch_code, r.created_at
            FROM medicine_receipts r
            JOIN stock_batches b ON b.receipt_id = r.id
            WHERE ($1::uuid IS NULL OR r.center_id = $1)
              AND ($2::uuid IS NULL OR r.medicine_id = $2)
            ORDER BY r.received_date DESC, r.created_at DESC
            LIMIT $3
            "#,
        )
        .bind(filter.center_id)
        .bind(filter.medicine_id)
        .bind(filter.limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Receipt::from).collect())
    }
}
