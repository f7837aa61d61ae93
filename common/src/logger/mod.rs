mod init;
mod macros;

pub use init::init_logger;
pub use macros::{batch_span, channel_span};
