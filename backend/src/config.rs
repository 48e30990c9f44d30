//! Configuration management for the MedStock ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (config/development.toml, config/production.toml)
//! 3. Environment variable overrides with MEDSTOCK_ prefix

use config::{ConfigError, Environment, File};
use serde::Deserialize;
use shared::{StockHealthPolicy, DEFAULT_LOW_STOCK_THRESHOLD};

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Stock health policy
    pub stock: StockConfig,

    /// Aggregate audit behaviour
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Apply embedded migrations at start-up
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StockConfig {
    /// Upper bound (inclusive) of the "low stock" band, in the medicine's unit
    pub low_stock_threshold: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    /// Rebuild aggregate rows that disagree with their batches
    pub repair_drift: bool,
}

impl StockConfig {
    pub fn policy(&self) -> StockHealthPolicy {
        StockHealthPolicy {
            low_stock_threshold: self.low_stock_threshold,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("MEDSTOCK_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.run_migrations", false)?
            .set_default("stock.low_stock_threshold", DEFAULT_LOW_STOCK_THRESHOLD)?
            .set_default("audit.repair_drift", false)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (MEDSTOCK_ prefix)
            .add_source(
                Environment::with_prefix("MEDSTOCK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stock.low_stock_threshold < 0 {
            return Err(ConfigError::Message(
                "stock.low_stock_threshold must not be negative".to_string(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message(
                "database.min_connections exceeds database.max_connections".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: DEFAULT_LOW_STOCK_THRESHOLD,
        }
    }
}
