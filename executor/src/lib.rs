pub mod coordinator;
pub mod types;

pub use coordinator::{OrderExecutionCoordinator, PendingTrade};
pub use types::{ExecutionConfig, TradeConfig, TradeErrorKind, TradeResult};
