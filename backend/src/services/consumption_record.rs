//! Weekly consumption records and stock-health observations

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use shared::{ConsumptionRecord, DateRange, Observation, ReportingPeriod, StockHealthPolicy};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::clock::Clock;
use crate::db::escape_like;
use crate::error::{unique_violation, AppError, AppResult};
use crate::services::{ConsumptionEngine, LedgerService};

/// Service for recording consumption reports
#[derive(Clone)]
pub struct ConsumptionRecordService {
    db: PgPool,
    engine: ConsumptionEngine,
    policy: StockHealthPolicy,
    clock: Arc<dyn Clock>,
}

/// Input for recording a consumption report
#[derive(Debug, Deserialize, Validate)]
pub struct RecordConsumptionInput {
    pub center_id: Uuid,
    pub medicine_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[validate(range(min = 0, message = "Consumed quantity cannot be negative"))]
    pub quantity_used: i64,
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

/// Input for editing a record's metadata
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRecordInput {
    #[validate(length(max = 2000, message = "Notes must be at most 2000 characters"))]
    pub notes: Option<String>,
}

/// Filter for listing consumption records
#[derive(Debug, Default, Deserialize)]
pub struct ConsumptionRecordFilter {
    pub center_id: Option<Uuid>,
    pub medicine_id: Option<Uuid>,
    /// `from` bounds `period_start`, `to` bounds `period_end`
    #[serde(default)]
    pub period: DateRange,
    /// Case-insensitive substring of the medicine name
    pub medicine_search: Option<String>,
}

/// Row for consumption record queries
#[derive(Debug, FromRow)]
struct ConsumptionRecordRow {
    id: Uuid,
    center_id: Uuid,
    medicine_id: Uuid,
    period_start: NaiveDate,
    period_end: NaiveDate,
    quantity_used: i64,
    observation: Option<String>,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConsumptionRecordRow> for ConsumptionRecord {
    type Error = AppError;

    fn try_from(row: ConsumptionRecordRow) -> Result<Self, Self::Error> {
        let observation = row
            .observation
            .as_deref()
            .map(str::parse::<Observation>)
            .transpose()
            .map_err(AppError::ConsistencyViolation)?;

        Ok(Self {
            id: row.id,
            center_id: row.center_id,
            medicine_id: row.medicine_id,
            period_start: row.period_start,
            period_end: row.period_end,
            quantity_used: row.quantity_used,
            observation,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl ConsumptionRecordService {
    /// Create a new ConsumptionRecordService instance
    pub fn new(
        db: PgPool,
        ledger: LedgerService,
        policy: StockHealthPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            engine: ConsumptionEngine::new(ledger),
            policy,
            clock,
        }
    }

    /// Record a consumption report, consume the ledger FEFO and classify
    /// the resulting stock.
    ///
    /// All-or-nothing: if consumption fails no record is left behind and
    /// no batch is touched.
    pub async fn record_consumption(
        &self,
        input: RecordConsumptionInput,
    ) -> AppResult<ConsumptionRecord> {
        input.validate()?;
        let period = ReportingPeriod::new(input.period_start, input.period_end)
            .map_err(|msg| AppError::validation("period_end", msg))?;

        let duplicate = || AppError::DuplicatePeriod {
            center_id: input.center_id,
            medicine_id: input.medicine_id,
            period_start: input.period_start,
            period_end: input.period_end,
        };

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

        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM consumption_records
                WHERE period_start = $1 AND period_end = $2
                  AND medicine_id = $3 AND center_id = $4
            )
            "#,
        )
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(input.medicine_id)
        .bind(input.center_id)
        .fetch_one(&mut *tx)
        .await?;

        if exists {
            return Err(duplicate());
        }

        let now = self.clock.now();
        let record_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO consumption_records (
                center_id, medicine_id, period_start, period_end, quantity_used,
                notes, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING id
            "#,
        )
        .bind(input.center_id)
        .bind(input.medicine_id)
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(input.quantity_used)
        .bind(&input.notes)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|err| match unique_violation(&err).as_deref() {
            Some("consumption_records_period_key") => duplicate(),
            _ => AppError::from(err),
        })?;

        let outcome = match self
            .engine
            .consume(&mut tx, input.center_id, input.medicine_id, input.quantity_used)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                if err.is_internal() {
                    tracing::error!(
                        center_id = %input.center_id,
                        medicine_id = %input.medicine_id,
                        error = %err,
                        "Consumption failed, rolling back record"
                    );
                } else {
                    tracing::warn!(
                        center_id = %input.center_id,
                        medicine_id = %input.medicine_id,
                        code = err.code(),
                        error = %err,
                        "Consumption rejected, rolling back record"
                    );
                }
                return Err(err);
            }
        };

        let observation = Observation::classify(outcome.stock.total_quantity, &self.policy);

        let row = sqlx::query_as::<_, ConsumptionRecordRow>(
            r#"
            UPDATE consumption_records
            SET observation = $1
            WHERE id = $2 AND observation IS NULL
            RETURNING id, center_id, medicine_id, period_start, period_end, quantity_used,
                      observation, notes, created_at, updated_at
            "#,
        )
        .bind(observation.as_str())
        .bind(record_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            record_id = %record_id,
            center_id = %input.center_id,
            medicine_id = %input.medicine_id,
            quantity = input.quantity_used,
            period_days = period.days(),
            remaining = outcome.stock.total_quantity,
            observation = %observation,
            "Consumption recorded"
        );

        row.try_into()
    }

    /// Edit a record's notes. Never re-runs consumption or reclassifies.
    pub async fn update_record(
        &self,
        record_id: Uuid,
        input: UpdateRecordInput,
    ) -> AppResult<ConsumptionRecord> {
        input.validate()?;

        let row = sqlx::query_as::<_, ConsumptionRecordRow>(
            r#"
            UPDATE consumption_records
            SET notes = $1, updated_at = $2
            WHERE id = $3
            RETURNING id, center_id, medicine_id, period_start, period_end, quantity_used,
                      observation, notes, created_at, updated_at
            "#,
        )
        .bind(&input.notes)
        .bind(self.clock.now())
        .bind(record_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Consumption record".to_string()))?;

        row.try_into()
    }

    /// Get a consumption record by id
    pub async fn get_record(&self, record_id: Uuid) -> AppResult<ConsumptionRecord> {
        let row = sqlx::query_as::<_, ConsumptionRecordRow>(
            r#"
            SELECT id, center_id, medicine_id, period_start, period_end, quantity_used,
                   observation, notes, created_at, updated_at
            FROM consumption_records
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Consumption record".to_string()))?;

        row.try_into()
    }

    /// List records, most recent period first
    pub async fn list_records(
        &self,
        filter: &ConsumptionRecordFilter,
    ) -> AppResult<Vec<ConsumptionRecord>> {
        let search = filter
            .medicine_search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(escape_like);

        let rows = sqlx::query_as::<_, ConsumptionRecordRow>(
            r#"
            SELECT cr.id, cr.center_id, cr.medicine_id, cr.period_start, cr.period_end,
                   cr.quantity_used, cr.observation, cr.notes, cr.created_at, cr.updated_at
            FROM consumption_records cr
            JOIN medicines m ON m.id = cr.medicine_id
            WHERE ($1::uuid IS NULL OR cr.center_id = $1)
              AND ($2::uuid IS NULL OR cr.medicine_id = $2)
              AND ($3::date IS NULL OR cr.period_start >= $3)
              AND ($4::date IS NULL OR cr.period_end <= $4)
              AND ($5::text IS NULL OR m.name ILIKE '%' || $5 || '%' ESCAPE '\')
            ORDER BY cr.period_end DESC, cr.created_at DESC
            "#,
        )
        .bind(filter.center_id)
        .bind(filter.medicine_id)
        .bind(filter.period.from)
        .bind(filter.period.to)
        .bind(search)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(ConsumptionRecord::try_from).collect()
    }
}
