pub mod config;
pub mod engine;
pub mod policy;
pub mod state;
pub mod types;

pub use config::{ArbitrageConfig, ConfigError, PairThresholds};
pub use engine::ArbitrageCoordinator;
pub use types::{CoordinatorStatus, Leg, StatusReport};
