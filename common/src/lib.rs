pub mod batch;
pub mod logger;
pub mod time;

pub use batch::BatchId;
