pub mod manager;
pub mod model;
pub mod store;

pub use manager::FundLedger;
pub use model::{FundRecord, FundStatus, LegFill};
