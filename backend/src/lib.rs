//! MedStock ledger backend
//!
//! Batch ledger, stock aggregate cache and FEFO consumption for
//! pharmaceutical stock held at medical centers, backed by PostgreSQL.
//!
//! Receipt intake and consumption recording are the only mutation entry
//! points. Each runs as a single transaction.

use std::sync::Arc;

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod services;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::Config;
pub use error::{AppError, AppResult};

use services::{
    AnalyticsService, ConsumptionRecordService, LedgerService, ReceiptService, ReferenceService,
};

/// Application state shared across callers
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(db: sqlx::PgPool, config: Config) -> Self {
        Self {
            db,
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn ledger(&self) -> LedgerService {
        LedgerService::new(self.db.clone(), self.clock.clone())
    }

    pub fn receipts(&self) -> ReceiptService {
        ReceiptService::new(self.db.clone(), self.ledger(), self.clock.clone())
    }

    pub fn consumption(&self) -> ConsumptionRecordService {
        ConsumptionRecordService::new(
            self.db.clone(),
            self.ledger(),
            self.config.stock.policy(),
            self.clock.clone(),
        )
    }

    pub fn reference(&self) -> ReferenceService {
        ReferenceService::new(self.db.clone())
    }

    pub fn analytics(&self) -> AnalyticsService {
        AnalyticsService::new(self.db.clone(), self.receipts(), self.config.stock.policy())
    }
}
