//! Business logic services for the MedStock ledger

pub mod analytics;
pub mod consumption;
pub mod consumption_record;
pub mod ledger;
pub mod receipt;
pub mod reference;

pub use analytics::{AnalyticsService, DEFAULT_TOP_LIMIT};
pub use consumption::{ConsumptionEngine, ConsumptionOutcome};
pub use consumption_record::{
    ConsumptionRecordFilter, ConsumptionRecordService, RecordConsumptionInput, UpdateRecordInput,
};
pub use ledger::{LedgerService, NewBatch};
pub use receipt::{ReceiptFilter, ReceiptService, ReceiveInput};
pub use reference::{CreateCenterInput, CreateMedicineInput, ReferenceService};
