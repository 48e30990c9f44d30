//! Reference data: medical centers and medicines
//!
//! Names are matched on a normalized key so that spreadsheet imports with
//! stray whitespace or curly apostrophes resolve to the same row.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{normalize_name, MedicalCenter, Medicine};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::db::escape_like;
use crate::error::{unique_violation, AppError, AppResult};

/// Service for centers and medicines
#[derive(Clone)]
pub struct ReferenceService {
    db: PgPool,
}

/// Input for creating a medical center
#[derive(Debug, Deserialize, Validate)]
pub struct CreateCenterInput {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
}

/// Input for creating a medicine
#[derive(Debug, Deserialize, Validate)]
pub struct CreateMedicineInput {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    #[validate(length(min = 1, max = 20, message = "Unit must be 1-20 characters"))]
    pub unit: String,
}

#[derive(Debug, FromRow)]
struct CenterRow {
    id: Uuid,
    name: String,
    created_at: DateTime<Utc>,
}

impl From<CenterRow> for MedicalCenter {
    fn from(row: CenterRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MedicineRow {
    id: Uuid,
    name: String,
    unit: String,
    created_at: DateTime<Utc>,
}

impl From<MedicineRow> for Medicine {
    fn from(row: MedicineRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            unit: row.unit,
            created_at: row.created_at,
        }
    }
}

fn clean_display_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl ReferenceService {
    /// Create a new ReferenceService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Create a medical center
    pub async fn create_center(&self, input: CreateCenterInput) -> AppResult<MedicalCenter> {
        input.validate()?;
        let name = clean_display_name(&input.name);
        if name.is_empty() {
            return Err(AppError::validation("name", "Name must not be blank"));
        }

        let row = sqlx::query_as::<_, CenterRow>(
            r#"
            INSERT INTO medical_centers (name, name_key)
            VALUES ($1, $2)
            RETURNING id, name, created_at
            "#,
        )
        .bind(&name)
        .bind(normalize_name(&name))
        .fetch_one(&self.db)
        .await
        .map_err(|err| match unique_violation(&err) {
            Some(_) => AppError::DuplicateEntry("name".to_string()),
            None => AppError::from(err),
        })?;

        tracing::info!(center_id = %row.id, name = %row.name, "Medical center created");
        Ok(row.into())
    }

    /// Create a medicine
    pub async fn create_medicine(&self, input: CreateMedicineInput) -> AppResult<Medicine> {
        input.validate()?;
        let name = clean_display_name(&input.name);
        let unit = input.unit.trim().to_string();
        if name.is_empty() {
            return Err(AppError::validation("name", "Name must not be blank"));
        }
        if unit.is_empty() {
            return Err(AppError::validation("unit", "Unit must not be blank"));
        }

        let row = sqlx::query_as::<_, MedicineRow>(
            r#"
            INSERT INTO medicines (name, name_key, unit)
            VALUES ($1, $2, $3)
            RETURNING id, name, unit, created_at
            "#,
        )
        .bind(&name)
        .bind(normalize_name(&name))
        .bind(&unit)
        .fetch_one(&self.db)
        .await
        .map_err(|err| match unique_violation(&err) {
            Some(_) => AppError::DuplicateEntry("name".to_string()),
            None => AppError::from(err),
        })?;

        tracing::info!(medicine_id = %row.id, name = %row.name, "Medicine created");
        Ok(row.into())
    }

    /// Get a medical center by id
    pub async fn get_center(&self, center_id: Uuid) -> AppResult<MedicalCenter> {
        let row = sqlx::query_as::<_, CenterRow>(
            "SELECT id, name, created_at FROM medical_centers WHERE id = $1",
        )
        .bind(center_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Medical center".to_string()))?;

        Ok(row.into())
    }

    /// Get a medicine by id
    pub async fn get_medicine(&self, medicine_id: Uuid) -> AppResult<Medicine> {
        let row = sqlx::query_as::<_, MedicineRow>(
            "SELECT id, name, unit, created_at FROM medicines WHERE id = $1",
        )
        .bind(medicine_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Medicine".to_string()))?;

        Ok(row.into())
    }

    /// List all medical centers by name
    pub async fn list_centers(&self) -> AppResult<Vec<MedicalCenter>> {
        let rows = sqlx::query_as::<_, CenterRow>(
            "SELECT id, name, created_at FROM medical_centers ORDER BY name_key",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(MedicalCenter::from).collect())
    }

    /// List medicines, optionally filtered by a name substring
    pub async fn list_medicines(&self, search: Option<&str>) -> AppResult<Vec<Medicine>> {
        let search = search
            .map(normalize_name)
            .filter(|s| !s.is_empty())
            .map(|s| escape_like(&s));

        let rows = sqlx::query_as::<_, MedicineRow>(
            r#"
            SELECT id, name, unit, created_at
            FROM medicines
            WHERE ($1::text IS NULL OR name_key LIKE '%' || $1 || '%' ESCAPE '\')
            ORDER BY name_key, unit
            "#,
        )
        .bind(search)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Medicine::from).collect())
    }

    /// Resolve a center from a loosely formatted name
    pub async fn find_center_by_name(&self, name: &str) -> AppResult<MedicalCenter> {
        let row = sqlx::query_as::<_, CenterRow>(
            "SELECT id, name, created_at FROM medical_centers WHERE name_key = $1",
        )
        .bind(normalize_name(name))
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Medical center '{}'", name.trim())))?;

        Ok(row.into())
    }

    /// Resolve a medicine from a loosely formatted name.
    ///
    /// The same name may exist in several units; without a unit the lookup
    /// only succeeds when the name is unambiguous.
    pub async fn find_medicine_by_name(
        &self,
        name: &str,
        unit: Option<&str>,
    ) -> AppResult<Medicine> {
        let rows = sqlx::query_as::<_, MedicineRow>(
            r#"
            SELECT id, name, unit, created_at
            FROM medicines
            WHERE name_key = $1 AND ($2::text IS NULL OR lower(unit) = lower($2))
            ORDER BY unit
            "#,
        )
        .bind(normalize_name(name))
        .bind(unit.map(str::trim))
        .fetch_all(&self.db)
        .await?;

        let mut rows = rows.into_iter();
        match (rows.next(), rows.next()) {
            (Some(row), None) => Ok(row.into()),
            (None, _) => Err(AppError::NotFound(format!("Medicine '{}'", name.trim()))),
            (Some(_), Some(_)) => Err(AppError::validation(
                "unit",
                format!("Medicine '{}' exists in several units", name.trim()),
            )),
        }
    }
}
