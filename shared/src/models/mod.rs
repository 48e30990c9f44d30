//! Domain models for the MedStock ledger

mod batch;
mod center;
mod consumption;
mod receipt;
mod stock;

pub use batch::*;
pub use center::*;
pub use consumption::*;
pub use receipt::*;
pub use stock::*;
