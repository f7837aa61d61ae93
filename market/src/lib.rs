pub mod book;
pub mod checksum;
pub mod estimator;
pub mod feed;
pub mod types;
pub mod venue;

pub use book::{BookError, DepthBook};
pub use types::{BookSide, Channel, DepthBookState, DepthLevel, Pair};
