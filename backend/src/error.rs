//! Error handling for the MedStock ledger
//!
//! Errors are typed conditions. Callers (HTTP layer, spreadsheet import)
//! translate them into user-facing messages using [`AppError::code`].

use chrono::NaiveDate;
use shared::FefoError;
use thiserror::Error;
use uuid::Uuid;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Ledger errors
    #[error("Insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("Consumption already recorded for {period_start}..{period_end}")]
    DuplicatePeriod {
        center_id: Uuid,
        medicine_id: Uuid,
        period_start: NaiveDate,
        period_end: NaiveDate,
    },

    #[error("Ledger consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::DuplicatePeriod { .. } => "DUPLICATE_PERIOD",
            AppError::ConsistencyViolation(_) => "CONSISTENCY_VIOLATION",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
        }
    }

    /// Internal failures that should be escalated rather than shown to users
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::ConsistencyViolation(_)
                | AppError::Configuration(_)
                | AppError::DatabaseError(_)
        )
    }
}

impl From<FefoError> for AppError {
    fn from(err: FefoError) -> Self {
        match err {
            FefoError::InvalidQuantity(_) => AppError::validation("quantity", err.to_string()),
            FefoError::InsufficientStock {
                requested,
                available,
            } => AppError::InsufficientStock {
                requested,
                available,
            },
            FefoError::Shortfall { .. } => AppError::ConsistencyViolation(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let (field, message) = errors
            .field_errors()
            .into_iter()
            .next()
            .map(|(field, errs)| {
                let message = errs
                    .first()
                    .and_then(|e| e.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| format!("invalid {}", field));
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("input".to_string(), errors.to_string()));
        AppError::Validation { field, message }
    }
}

/// Name of the unique constraint a database error tripped, if any
pub fn unique_violation(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Some(db_err.constraint().unwrap_or_default().to_string())
        }
        _ => None,
    }
}

/// Result type alias for services
pub type AppResult<T> = Result<T, AppError>;
