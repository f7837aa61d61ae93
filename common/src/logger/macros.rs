use tracing::Span;

use crate::BatchId;

/// Span covering every log line of one arbitrage operation (both legs,
/// compensation and ledger writes).
pub fn batch_span(batch_id: &BatchId, pair: &str) -> Span {
    tracing::info_span!("batch", batch_id = %batch_id, pair = %pair)
}

/// Span for a feed read loop of one venue connection.
pub fn channel_span(venue: &str) -> Span {
    tracing::info_span!("feed", venue = %venue)
}
