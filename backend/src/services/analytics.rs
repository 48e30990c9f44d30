//! Dashboard aggregations over the ledger

use serde::Serialize;
use shared::{Receipt, StockHealthPolicy};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::services::{ReceiptFilter, ReceiptService};

/// Default number of rows for top-N queries
pub const DEFAULT_TOP_LIMIT: i64 = 5;

/// Analytics service for dashboard summaries
#[derive(Clone)]
pub struct AnalyticsService {
    db: PgPool,
    receipts: ReceiptService,
    policy: StockHealthPolicy,
}

/// Total consumption recorded at a center
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CenterConsumption {
    pub center_id: Uuid,
    pub center_name: String,
    pub total_consumed: i64,
}

/// Total stock currently held at a center
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CenterStock {
    pub center_id: Uuid,
    pub center_name: String,
    pub total_stock: i64,
}

/// Total consumption of a medicine across centers
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MedicineConsumption {
    pub medicine_id: Uuid,
    pub medicine_name: String,
    pub unit: String,
    pub total_consumed: i64,
}

/// A pair at or below the low-stock threshold
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct LowStockAlert {
    pub center_id: Uuid,
    pub center_name: String,
    pub medicine_id: Uuid,
    pub medicine_name: String,
    pub unit: String,
    pub total_quantity: i64,
}

fn validate_limit(limit: i64) -> AppResult<()> {
    if limit <= 0 {
        return Err(AppError::validation("limit", "Limit must be greater than 0"));
    }
    Ok(())
}

impl AnalyticsService {
    /// Create a new AnalyticsService instance
    pub fn new(db: PgPool, receipts: ReceiptService, policy: StockHealthPolicy) -> Self {
        Self {
            db,
            receipts,
            policy,
        }
    }

    /// Total consumed per center, centers without records included at zero
    pub async fn total_consumed_per_center(&self) -> AppResult<Vec<CenterConsumption>> {
        let rows = sqlx::query_as::<_, CenterConsumption>(
            r#"
            SELECT c.id as center_id, c.name as center_name,
                   COALESCE(SUM(cr.quantity_used), 0)::BIGINT as total_consumed
            FROM medical_centers c
            LEFT JOIN consumption_records cr ON cr.center_id = c.id
            GROUP BY c.id, c.name
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    /// Total current stock per center, read from the aggregate cache
    pub async fn total_stock_per_center(&self) -> AppResult<Vec<CenterStock>> {
        let rows = sqlx::query_as::<_, CenterStock>(
            r#"
            SELECT c.id as center_id, c.name as center_name,
                   COALESCE(SUM(sl.total_quantity), 0)::BIGINT as total_stock
            FROM medical_centers c
            LEFT JOIN stock_levels sl ON sl.center_id = c.id
            GROUP BY c.id, c.name
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    /// Most consumed medicines across all centers
    pub async fn top_medicines(&self, limit: i64) -> AppResult<Vec<MedicineConsumption>> {
        validate_limit(limit)?;

        let rows = sqlx::query_as::<_, MedicineConsumption>(
            r#"
            SELECT m.id as medicine_id, m.name as medicine_name, m.unit,
                   SUM(cr.quantity_used)::BIGINT as total_consumed
            FROM consumption_records cr
            JOIN medicines m ON m.id = cr.medicine_id
            GROUP BY m.id, m.name, m.unit
            ORDER BY total_consumed DESC, m.name
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }

    /// Latest receipts across all centers
    pub async fn recent_receipts(&self, limit: i64) -> AppResult<Vec<Receipt>> {
        validate_limit(limit)?;
        self.receipts
            .list_receipts(&ReceiptFilter {
                limit: Some(limit),
                ..Default::default()
            })
            .await
    }

    /// Pairs at or below the configured low-stock threshold
    pub async fn low_stock_alerts(&self) -> AppResult<Vec<LowStockAlert>> {
        let rows = sqlx::query_as::<_, LowStockAlert>(
            r#"
            SELECT c.id as center_id, c.name as center_name,
                   m.id as medicine_id, m.name as medicine_name, m.unit,
                   sl.total_quantity
            FROM stock_levels sl
            JOIN medical_centers c ON c.id = sl.center_id
            JOIN medicines m ON m.id = sl.medicine_id
            WHERE sl.total_quantity <= $1
            ORDER BY sl.total_quantity ASC, c.name, m.name
            "#,
        )
        .bind(self.policy.low_stock_threshold)
        .fetch_all(&self.db)
        .await?;

        Ok(rows)
    }
}
