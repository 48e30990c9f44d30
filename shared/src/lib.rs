//! Shared types and models for the MedStock ledger
//!
//! This crate holds the database-free half of the system: domain models,
//! the FEFO consumption planner and the stock-health classifier. The backend
//! crate drives them against PostgreSQL.

pub mod fefo;
pub mod models;
pub mod types;
pub mod validation;

pub use fefo::*;
pub use models::*;
pub use types::*;
pub use validation::*;
