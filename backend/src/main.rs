//! MedStock maintenance run
//!
//! Applies migrations, audits the stock aggregate cache against the batch
//! ledger (repairing drift when configured) and reports low stock.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use backend::{db, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medstock=debug,backend=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::load()?;

    tracing::info!("Starting MedStock maintenance run");
    tracing::info!("Environment: {}", config.environment);

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = db::connect(&config.database).await?;
    tracing::info!("Database connection established");

    if config.database.run_migrations {
        tracing::info!("Running database migrations...");
        db::migrate(&db_pool).await?;
        tracing::info!("Migrations completed");
    }

    let repair = config.audit.repair_drift;
    let state = AppState::new(db_pool, config);

    let ledger = state.ledger();
    let drift = if repair {
        ledger.rebuild_aggregates().await?
    } else {
        ledger.audit_aggregates().await?
    };

    if drift.is_empty() {
        tracing::info!("Stock aggregates match the batch ledger");
    } else {
        for d in &drift {
            tracing::warn!(
                center_id = %d.center_id,
                medicine_id = %d.medicine_id,
                cached = d.cached_quantity,
                ledger = d.ledger_quantity,
                difference = d.difference(),
                repaired = repair,
                "Stock aggregate drift"
            );
        }
    }

    let alerts = state.analytics().low_stock_alerts().await?;
    tracing::info!(
        threshold = state.config.stock.low_stock_threshold,
        count = alerts.len(),
        "Low stock report"
    );
    for alert in &alerts {
        tracing::info!(
            center = %alert.center_name,
            medicine = %alert.medicine_name,
            unit = %alert.unit,
            quantity = alert.total_quantity,
            "Low stock"
        );
    }

    Ok(())
}
