//! Ledger scenario tests against PostgreSQL
//!
//! Each test gets a fresh database with the embedded migrations applied.
//! Run with `DATABASE_URL` set and
//! `cargo test -p medstock-backend -- --include-ignored`.
//!
//! Covers:
//! - receipt then FEFO consumption end to end
//! - all-or-nothing rollback on insufficient stock
//! - duplicate reporting periods
//! - concurrent consumption on one pair
//! - aggregate cache agreeing with the batch ledger

use std::sync::Arc;

use backend::config::{AuditConfig, DatabaseConfig, StockConfig};
use backend::services::{
    ConsumptionRecordFilter, CreateCenterInput, CreateMedicineInput, ReceiptFilter,
    ReceiveInput, RecordConsumptionInput, UpdateRecordInput, DEFAULT_TOP_LIMIT,
};
use backend::{AppError, AppState, Config, FixedClock};
use chrono::{Duration, NaiveDate};
use shared::{BatchFilter, DateRange, MedicalCenter, Medicine, Observation};
use sqlx::PgPool;

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn state(pool: PgPool) -> AppState {
    let config = Config {
        environment: "test".to_string(),
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 5,
            min_connections: 1,
            run_migrations: false,
        },
        stock: StockConfig::default(),
        audit: AuditConfig { repair_drift: true },
    };
    AppState::new(pool, config).with_clock(Arc::new(FixedClock::on(today())))
}

async fn seed(app: &AppState) -> anyhow::Result<(MedicalCenter, Medicine)> {
    let reference = app.reference();
    let center = reference
        .create_center(CreateCenterInput {
            name: "Lakeside Clinic".to_string(),
        })
        .await?;
    let medicine = reference
        .create_medicine(CreateMedicineInput {
            name: "Paracetamol 500mg".to_string(),
            unit: "tablets".to_string(),
        })
        .await?;
    Ok((center, medicine))
}

fn receive(
    center: &MedicalCenter,
    medicine: &Medicine,
    quantity: i64,
    expiry_in_days: Option<i64>,
) -> ReceiveInput {
    ReceiveInput {
        center_id: center.id,
        medicine_id: medicine.id,
        quantity,
        expiry_date: expiry_in_days.map(|d| today() + Duration::days(d)),
        received_date: None,
        batch_code: None,
    }
}

fn report(
    center: &MedicalCenter,
    medicine: &Medicine,
    week: i64,
    quantity_used: i64,
) -> RecordConsumptionInput {
    let period_start = today() - Duration::weeks(week);
    RecordConsumptionInput {
        center_id: center.id,
        medicine_id: medicine.id,
        period_start,
        period_end: period_start + Duration::days(6),
        quantity_used,
        notes: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_receive_and_consume_end_to_end(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool);
    let (center, medicine) = seed(&app).await?;
    let receipts = app.receipts();
    let ledger = app.ledger();

    let later = receipts.receive(receive(&center, &medicine, 20, Some(10))).await?;
    let sooner = receipts.receive(receive(&center, &medicine, 15, Some(5))).await?;
    assert_eq!(later.received_date, today());
    assert_eq!(later.batch_code.len(), shared::BATCH_CODE_LENGTH);

    let stock = ledger.get_stock(center.id, medicine.id).await?;
    assert_eq!(stock.total_quantity, 35);

    let record = app
        .consumption()
        .record_consumption(report(&center, &medicine, 1, 12))
        .await?;
    assert_eq!(record.observation, Some(Observation::SufficientStock));

    let batches = ledger
        .list_batches(center.id, medicine.id, BatchFilter::all())
        .await?;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].id, sooner.batch_id);
    assert_eq!(batches[0].remaining_quantity, 3);
    assert_eq!(batches[1].id, later.batch_id);
    assert_eq!(batches[1].remaining_quantity, 20);
    assert_eq!(ledger.get_stock(center.id, medicine.id).await?.total_quantity, 23);

    let err = app
        .consumption()
        .record_consumption(report(&center, &medicine, 0, 30))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::InsufficientStock {
            requested: 30,
            available: 23
        }
    ));

    // Nothing from the rejected report survives
    let records = app
        .consumption()
        .list_records(&ConsumptionRecordFilter {
            center_id: Some(center.id),
            ..Default::default()
        })
        .await?;
    assert_eq!(records.len(), 1);
    assert_eq!(ledger.get_stock(center.id, medicine.id).await?.total_quantity, 23);
    let after = ledger
        .list_batches(center.id, medicine.id, BatchFilter::all())
        .await?;
    assert_eq!(after, batches);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_fefo_spreads_across_batches(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool);
    let (center, medicine) = seed(&app).await?;
    let receipts = app.receipts();

    // Received out of expiry order, plus one undated batch received first
    receipts.receive(receive(&center, &medicine, 5, None)).await?;
    receipts.receive(receive(&center, &medicine, 5, Some(30))).await?;
    receipts.receive(receive(&center, &medicine, 5, Some(10))).await?;
    receipts.receive(receive(&center, &medicine, 5, Some(20))).await?;

    let record = app
        .consumption()
        .record_consumption(report(&center, &medicine, 1, 7))
        .await?;
    assert_eq!(record.observation, Some(Observation::SufficientStock));

    let batches = app
        .ledger()
        .list_batches(center.id, medicine.id, BatchFilter::all())
        .await?;
    let remaining: Vec<i64> = batches.iter().map(|b| b.remaining_quantity).collect();
    assert_eq!(remaining, vec![0, 3, 5, 5]);
    assert!(batches[3].expiry_date.is_none());

    let live = app
        .ledger()
        .list_batches(center.id, medicine.id, BatchFilter::default())
        .await?;
    assert_eq!(live.len(), 3);
    assert!(live.iter().all(|b| BatchFilter::default().matches(b, today())));

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_observation_bands(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool);
    let (center, medicine) = seed(&app).await?;
    app.receipts()
        .receive(receive(&center, &medicine, 25, Some(60)))
        .await?;
    let records = app.consumption();

    let first = records.record_consumption(report(&center, &medicine, 3, 15)).await?;
    assert_eq!(first.observation, Some(Observation::LowStock));

    let second = records.record_consumption(report(&center, &medicine, 2, 10)).await?;
    assert_eq!(second.observation, Some(Observation::OutOfStock));

    // Zero consumption still records a classified report
    let third = records.record_consumption(report(&center, &medicine, 1, 0)).await?;
    assert_eq!(third.quantity_used, 0);
    assert_eq!(third.observation, Some(Observation::OutOfStock));

    let alerts = app.analytics().low_stock_alerts().await?;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].total_quantity, 0);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_duplicate_period_rejected(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool);
    let (center, medicine) = seed(&app).await?;
    app.receipts()
        .receive(receive(&center, &medicine, 50, Some(90)))
        .await?;
    let records = app.consumption();

    records.record_consumption(report(&center, &medicine, 1, 10)).await?;
    let err = records
        .record_consumption(report(&center, &medicine, 1, 5))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_PERIOD");

    let stock = app.ledger().get_stock(center.id, medicine.id).await?;
    assert_eq!(stock.total_quantity, 40);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_updating_record_does_not_consume_again(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool);
    let (center, medicine) = seed(&app).await?;
    app.receipts()
        .receive(receive(&center, &medicine, 30, Some(90)))
        .await?;
    let records = app.consumption();

    let record = records.record_consumption(report(&center, &medicine, 1, 8)).await?;
    let updated = records
        .update_record(
            record.id,
            UpdateRecordInput {
                notes: Some("Counted twice, figure confirmed".to_string()),
            },
        )
        .await?;

    assert_eq!(updated.quantity_used, 8);
    assert_eq!(updated.observation, record.observation);
    assert_eq!(
        updated.notes.as_deref(),
        Some("Counted twice, figure confirmed")
    );
    assert_eq!(app.ledger().get_stock(center.id, medicine.id).await?.total_quantity, 22);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_invalid_inputs_leave_ledger_untouched(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool);
    let (center, medicine) = seed(&app).await?;
    let receipts = app.receipts();

    let err = receipts
        .receive(receive(&center, &medicine, 0, Some(10)))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let mut expired_on_arrival = receive(&center, &medicine, 5, None);
    expired_on_arrival.expiry_date = Some(today() - Duration::days(1));
    assert!(receipts.receive(expired_on_arrival).await.is_err());

    let mut unknown = receive(&center, &medicine, 5, None);
    unknown.center_id = uuid::Uuid::new_v4();
    let err = receipts.receive(unknown).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let mut backwards = report(&center, &medicine, 1, 1);
    backwards.period_end = backwards.period_start - Duration::days(1);
    let err = app.consumption().record_consumption(backwards).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let mut unknown_center = report(&center, &medicine, 2, 1);
    unknown_center.center_id = uuid::Uuid::new_v4();
    let err = app.consumption().record_consumption(unknown_center).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(ref what) if what == "Medical center"));
    assert!(!err.is_internal());

    let mut unknown_medicine = report(&center, &medicine, 3, 0);
    unknown_medicine.medicine_id = uuid::Uuid::new_v4();
    let err = app.consumption().record_consumption(unknown_medicine).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(ref what) if what == "Medicine"));

    let records = app
        .consumption()
        .list_records(&ConsumptionRecordFilter::default())
        .await?;
    assert!(records.is_empty());

    let stock = app.ledger().get_stock(center.id, medicine.id).await?;
    assert_eq!(stock.total_quantity, 0);
    assert!(receipts.list_receipts(&ReceiptFilter::default()).await?.is_empty());

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_concurrent_consumption_never_overdraws(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool.clone());
    let (center, medicine) = seed(&app).await?;
    app.receipts()
        .receive(receive(&center, &medicine, 20, Some(30)))
        .await?;

    let handles: Vec<_> = (1..=6)
        .map(|week| {
            let records = app.consumption();
            let input = report(&center, &medicine, week, 7);
            tokio::spawn(async move { records.record_consumption(input).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await? {
            Ok(_) => succeeded += 1,
            Err(err) => {
                assert_eq!(err.code(), "INSUFFICIENT_STOCK", "unexpected error: {err}");
                rejected += 1;
            }
        }
    }
    assert_eq!(succeeded, 2);
    assert_eq!(rejected, 4);

    let stock = app.ledger().get_stock(center.id, medicine.id).await?;
    let batch_sum: i64 = app
        .ledger()
        .list_batches(center.id, medicine.id, BatchFilter::all())
        .await?
        .iter()
        .map(|b| b.remaining_quantity)
        .sum();
    assert_eq!(stock.total_quantity, 6);
    assert_eq!(batch_sum, 6);
    assert!(app.ledger().audit_aggregates().await?.is_empty());

    let records = app
        .consumption()
        .list_records(&ConsumptionRecordFilter::default())
        .await?;
    assert_eq!(records.len(), 2);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_duplicate_batch_code(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool);
    let (center, medicine) = seed(&app).await?;
    let receipts = app.receipts();

    let mut first = receive(&center, &medicine, 5, Some(10));
    first.batch_code = Some("LOT-2024-A".to_string());
    receipts.receive(first).await?;

    let mut second = receive(&center, &medicine, 7, Some(10));
    second.batch_code = Some("LOT-2024-A".to_string());
    let err = receipts.receive(second).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateEntry(ref field) if field == "batch_code"));

    assert_eq!(app.ledger().get_stock(center.id, medicine.id).await?.total_quantity, 5);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_audit_finds_and_repairs_drift(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool.clone());
    let (center, medicine) = seed(&app).await?;
    app.receipts()
        .receive(receive(&center, &medicine, 12, Some(10)))
        .await?;
    let ledger = app.ledger();

    assert!(ledger.audit_aggregates().await?.is_empty());

    sqlx::query("UPDATE stock_levels SET total_quantity = 99 WHERE center_id = $1")
        .bind(center.id)
        .execute(&pool)
        .await?;

    let drift = ledger.audit_aggregates().await?;
    assert_eq!(drift.len(), 1);
    assert_eq!(drift[0].cached_quantity, 99);
    assert_eq!(drift[0].ledger_quantity, 12);

    ledger.rebuild_aggregates().await?;
    assert!(ledger.audit_aggregates().await?.is_empty());
    assert_eq!(ledger.get_stock(center.id, medicine.id).await?.total_quantity, 12);

    Ok(())
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL pointing at PostgreSQL"]
async fn test_reference_lookup_and_listing(pool: PgPool) -> anyhow::Result<()> {
    let app = state(pool);
    let (center, medicine) = seed(&app).await?;
    let reference = app.reference();

    let found = reference.find_center_by_name("  lakeside   CLINIC ").await?;
    assert_eq!(found.id, center.id);
    let found = reference.find_medicine_by_name("paracetamol 500MG", None).await?;
    assert_eq!(found.id, medicine.id);

    let err = reference
        .create_center(CreateCenterInput {
            name: "LAKESIDE clinic".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "DUPLICATE_ENTRY");

    app.receipts()
        .receive(receive(&center, &medicine, 40, Some(30)))
        .await?;
    app.consumption()
        .record_consumption(report(&center, &medicine, 2, 6))
        .await?;
    app.consumption()
        .record_consumption(report(&center, &medicine, 1, 4))
        .await?;

    let filtered = app
        .consumption()
        .list_records(&ConsumptionRecordFilter {
            medicine_search: Some("PARACET".to_string()),
            period: DateRange {
                from: Some(today() - Duration::weeks(1)),
                to: None,
            },
            ..Default::default()
        })
        .await?;
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].quantity_used, 4);

    // Wildcard characters in search text match literally
    reference
        .create_medicine(CreateMedicineInput {
            name: "Zinc 20% syrup".to_string(),
            unit: "ml".to_string(),
        })
        .await?;
    assert_eq!(reference.list_medicines(Some("%")).await?.len(), 1);
    assert_eq!(reference.list_medicines(Some("20%")).await?.len(), 1);
    assert_eq!(reference.list_medicines(None).await?.len(), 2);
    let wildcard = app
        .consumption()
        .list_records(&ConsumptionRecordFilter {
            medicine_search: Some("_aracetamol".to_string()),
            ..Default::default()
        })
        .await?;
    assert!(wildcard.is_empty());

    let analytics = app.analytics();
    let consumed = analytics.total_consumed_per_center().await?;
    assert_eq!(consumed[0].total_consumed, 10);
    let stock = analytics.total_stock_per_center().await?;
    assert_eq!(stock[0].total_stock, 30);
    let top = analytics.top_medicines(DEFAULT_TOP_LIMIT).await?;
    assert_eq!(top[0].medicine_id, medicine.id);
    assert_eq!(analytics.recent_receipts(1).await?.len(), 1);
    assert!(analytics.top_medicines(0).await.is_err());

    Ok(())
}
