//! Reference data: medical centers and medicines

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A medical center holding stock
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicalCenter {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A medicine tracked by the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Medicine {
    pub id: Uuid,
    pub name: String,
    /// Display unit, e.g. "tablets" or "vials"
    pub unit: String,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Display for Medicine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.unit)
    }
}
