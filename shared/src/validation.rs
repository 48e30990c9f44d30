//! Validation utilities for ledger inputs
//!
//! Struct-level rules live on the backend input types as `validator`
//! attributes; the checks here cover what a derive cannot express.

use chrono::NaiveDate;

// ============================================================================
// Quantity Validations
// ============================================================================

/// Received quantities must be strictly positive
pub fn validate_received_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity <= 0 {
        return Err("Received quantity must be greater than 0");
    }
    Ok(())
}

/// Consumed quantities may be zero (a week without usage) but not negative
pub fn validate_consumed_quantity(quantity: i64) -> Result<(), &'static str> {
    if quantity < 0 {
        return Err("Consumed quantity cannot be negative");
    }
    Ok(())
}

// ============================================================================
// Date Validations
// ============================================================================

/// A reporting period must not end before it starts
pub fn validate_period(start: NaiveDate, end: NaiveDate) -> Result<(), &'static str> {
    if end < start {
        return Err("Period end must not be before period start");
    }
    Ok(())
}

/// Expiry on or after the receipt date
pub fn validate_expiry(
    expiry_date: Option<NaiveDate>,
    received_date: NaiveDate,
) -> Result<(), &'static str> {
    match expiry_date {
        Some(expiry) if expiry < received_date => {
            Err("Expiry date must not be before the received date")
        }
        _ => Ok(()),
    }
}

// ============================================================================
// Identifier Validations
// ============================================================================

/// Caller-supplied batch codes: 4-32 characters of A-Z, 0-9 or '-'
pub fn validate_batch_code(code: &str) -> Result<(), &'static str> {
    if code.len() < 4 || code.len() > 32 {
        return Err("Batch code must be 4-32 characters");
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
    {
        return Err("Batch code may only contain A-Z, 0-9 and '-'");
    }
    Ok(())
}

/// Normalize a center or medicine name for lookup.
///
/// Trims, collapses internal whitespace, folds curly apostrophes to `'`
/// and lowercases.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace(['\u{2018}', '\u{2019}', '\u{02BC}'], "'")
        .to_lowercase()
}
