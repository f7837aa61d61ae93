//! DepthBook
//!
//! Keeps one [`DepthBookState`] per channel consistent with a venue's
//! snapshot + diff feed.
//!
//! ## Update protocol
//! - A snapshot replaces the channel wholesale and always succeeds.
//! - A diff must chain onto the stored book: its `previous_update_id` has to
//!   equal the stored `last_update_id`. Anything else is a sequence gap.
//! - A diff carrying a venue checksum is merged, then the checksum of the
//!   merged top levels is compared against it.
//! - A gap or a checksum mismatch discards the channel. The caller must
//!   request a fresh snapshot; merging on top of a corrupted base would
//!   silently produce wrong executable prices.
//!
//! ## Sharing
//! Each channel lives in its own slot guarded by a short lock. Writers build
//! a new state and swap the `Arc`; readers clone the `Arc` and never see a
//! half-applied merge. Diffs for one channel must come from a single writer
//! (the venue's feed loop) so they are applied in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::checksum::depth_checksum;
use crate::types::{BookSide, Channel, DepthBookState, DepthLevel};

/// Default cap on levels kept per side.
pub const DEFAULT_MAX_DEPTH: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("no synced book for {0}")]
    Uninitialized(Channel),

    #[error("sequence gap on {channel}: book at {expected}, diff chains from {got}")]
    SequenceGap {
        channel: Channel,
        expected: u64,
        got: u64,
    },

    #[error("checksum mismatch on {channel}: venue={expected} local={computed}")]
    ChecksumMismatch {
        channel: Channel,
        expected: u32,
        computed: u32,
    },

    #[error("book for {channel} is stale ({age_ms} ms since last update)")]
    Stale { channel: Channel, age_ms: u64 },
}

impl BookError {
    /// Whether the channel has been discarded and needs a fresh snapshot.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            BookError::Uninitialized(_)
                | BookError::SequenceGap { .. }
                | BookError::ChecksumMismatch { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    Synced,
}

/// Full book as delivered by a venue snapshot.
#[derive(Debug, Clone, Default)]
pub struct DepthSnapshot {
    pub asks: Vec<DepthLevel>,
    pub bids: Vec<DepthLevel>,
    pub update_id: u64,
}

/// Incremental change to a book.
#[derive(Debug, Clone, Default)]
pub struct DepthDiff {
    pub asks: Vec<DepthLevel>,
    pub bids: Vec<DepthLevel>,
    pub update_id: u64,
    pub previous_update_id: u64,
    pub checksum: Option<u32>,
}

type Slot = Arc<RwLock<Option<Arc<DepthBookState>>>>;

pub struct DepthBook {
    max_depth: usize,
    channels: RwLock<HashMap<Channel, Slot>>,
}

impl Default for DepthBook {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl DepthBook {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the channel's book wholesale.
    pub fn apply_snapshot(&self, channel: &Channel, snapshot: DepthSnapshot) -> Arc<DepthBookState> {
        let state = Arc::new(DepthBookState {
            asks: normalize(BookSide::Asks, snapshot.asks, self.max_depth),
            bids: normalize(BookSide::Bids, snapshot.bids, self.max_depth),
            last_update_id: snapshot.update_id,
            last_update_time: Instant::now(),
            checksum: None,
        });

        *self.slot(channel).write() = Some(state.clone());

        debug!(
            component = "depth_book",
            event = "snapshot",
            %channel,
            update_id = snapshot.update_id,
            asks = state.asks.len(),
            bids = state.bids.len()
        );

        state
    }

    /// Merge a diff into the channel's book.
    ///
    /// On `SequenceGap` or `ChecksumMismatch` the channel is discarded and
    /// stays `Uninitialized` until the next snapshot.
    pub fn apply_diff(&self, channel: &Channel, diff: DepthDiff) -> Result<Arc<DepthBookState>, BookError> {
        let slot = self.slot(channel);
        let mut guard = slot.write();

        let Some(current) = guard.as_ref() else {
            return Err(BookError::Uninitialized(channel.clone()));
        };

        if diff.previous_update_id != current.last_update_id
            || diff.update_id < current.last_update_id
        {
            let err = BookError::SequenceGap {
                channel: channel.clone(),
                expected: current.last_update_id,
                got: diff.previous_update_id,
            };
            *guard = None;
            warn!(component = "depth_book", event = "sequence_gap", error = %err);
            return Err(err);
        }

        let asks = merge_side(BookSide::Asks, &current.asks, diff.asks, self.max_depth);
        let bids = merge_side(BookSide::Bids, &current.bids, diff.bids, self.max_depth);

        if let Some(expected) = diff.checksum {
            let computed = depth_checksum(&bids, &asks);
            if computed != expected {
                let err = BookError::ChecksumMismatch {
                    channel: channel.clone(),
                    expected,
                    computed,
                };
                *guard = None;
                warn!(component = "depth_book", event = "checksum_mismatch", error = %err);
                return Err(err);
            }
        }

        let next = Arc::new(DepthBookState {
            asks,
            bids,
            last_update_id: diff.update_id,
            last_update_time: Instant::now(),
            checksum: diff.checksum.or(current.checksum),
        });

        *guard = Some(next.clone());
        Ok(next)
    }

    /// Current depth of the channel, refusing books older than `max_staleness`.
    pub fn get_depth(&self, channel: &Channel, max_staleness: Duration) -> Result<Arc<DepthBookState>, BookError> {
        let state = self
            .snapshot(channel)
            .ok_or_else(|| BookError::Uninitialized(channel.clone()))?;

        let age = Instant::now().saturating_duration_since(state.last_update_time);
        if age > max_staleness {
            return Err(BookError::Stale {
                channel: channel.clone(),
                age_ms: age.as_millis() as u64,
            });
        }

        Ok(state)
    }

    /// Latest state regardless of age.
    pub fn snapshot(&self, channel: &Channel) -> Option<Arc<DepthBookState>> {
        let slot = self.channels.read().get(channel).cloned()?;
        let state = slot.read().clone();
        state
    }

    pub fn channel_state(&self, channel: &Channel) -> ChannelState {
        match self.snapshot(channel) {
            Some(_) => ChannelState::Synced,
            None => ChannelState::Uninitialized,
        }
    }

    /// Discard one channel.
    pub fn invalidate(&self, channel: &Channel) {
        if let Some(slot) = self.channels.read().get(channel) {
            *slot.write() = None;
        }
    }

    /// Discard every channel of a venue, e.g. after its connection dropped.
    /// Returns the channels that were synced.
    pub fn invalidate_venue(&self, venue: &str) -> Vec<Channel> {
        let channels = self.channels.read();
        let mut dropped = Vec::new();

        for (channel, slot) in channels.iter().filter(|(c, _)| c.venue == venue) {
            if slot.write().take().is_some() {
                dropped.push(channel.clone());
            }
        }

        dropped
    }

    /// Channels that currently hold a synced book.
    pub fn channels(&self) -> Vec<Channel> {
        self.channels
            .read()
            .iter()
            .filter(|(_, slot)| slot.read().is_some())
            .map(|(c, _)| c.clone())
            .collect()
    }

    fn slot(&self, channel: &Channel) -> Slot {
        if let Some(slot) = self.channels.read().get(channel) {
            return slot.clone();
        }

        self.channels
            .write()
            .entry(channel.clone())
            .or_default()
            .clone()
    }
}

/// Sort levels into side order, collapse duplicate prices (last wins), drop
/// zero quantities and cap the length.
fn normalize(side: BookSide, levels: Vec<DepthLevel>, max_depth: usize) -> Vec<DepthLevel> {
    let mut out = sorted_updates(side, levels);
    out.retain(|l| !l.quantity.is_zero());
    out.truncate(max_depth);
    out
}

/// Incoming updates in side order with duplicate prices collapsed (the
/// later update wins). Zero quantities are kept: they are deletions.
fn sorted_updates(side: BookSide, levels: Vec<DepthLevel>) -> Vec<DepthLevel> {
    let mut indexed: Vec<(usize, DepthLevel)> = levels.into_iter().enumerate().collect();
    indexed.sort_by(|(ia, a), (ib, b)| {
        let by_price = match side {
            BookSide::Asks => a.price.cmp(&b.price),
            BookSide::Bids => b.price.cmp(&a.price),
        };
        by_price.then(ia.cmp(ib))
    });

    let mut out: Vec<DepthLevel> = Vec::with_capacity(indexed.len());
    for (_, level) in indexed {
        match out.last_mut() {
            Some(last) if last.price == level.price => *last = level,
            _ => out.push(level),
        }
    }
    out
}

/// Single forward walk over the existing side and the sorted updates.
///
/// - same price: zero quantity deletes, otherwise replaces
/// - update better than the next untouched existing level: insert
/// - otherwise the existing level is kept and the walk moves on
pub(crate) fn merge_side(
    side: BookSide,
    existing: &[DepthLevel],
    updates: Vec<DepthLevel>,
    max_depth: usize,
) -> Vec<DepthLevel> {
    let updates = sorted_updates(side, updates);
    let mut out = Vec::with_capacity((existing.len() + updates.len()).min(max_depth));

    let mut i = 0;
    let mut j = 0;

    while i < existing.len() && j < updates.len() && out.len() < max_depth {
        let current = existing[i];
        let update = updates[j];

        if current.price == update.price {
            if !update.quantity.is_zero() {
                out.push(update);
            }
            i += 1;
            j += 1;
        } else if side.is_better(update.price, current.price) {
            if !update.quantity.is_zero() {
                out.push(update);
            }
            j += 1;
        } else {
            out.push(current);
            i += 1;
        }
    }

    out.extend(existing[i..].iter().copied());
    out.extend(updates[j..].iter().copied().filter(|l| !l.quantity.is_zero()));
    out.truncate(max_depth);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use crate::types::Pair;

    fn lvl(p: Decimal, q: Decimal) -> DepthLevel {
        DepthLevel::new(p, q)
    }

    fn chan() -> Channel {
        Channel::new("okex", Pair::new("eth", "usdt"))
    }

    fn seeded(book: &DepthBook) {
        book.apply_snapshot(
            &chan(),
            DepthSnapshot {
                asks: vec![lvl(dec!(102), dec!(1)), lvl(dec!(101), dec!(2)), lvl(dec!(104), dec!(3))],
                bids: vec![lvl(dec!(99), dec!(1)), lvl(dec!(100), dec!(2)), lvl(dec!(97), dec!(3))],
                update_id: 10,
            },
        );
    }

    #[test]
    fn snapshot_sorts_and_drops_empty_levels() {
        let book = DepthBook::default();
        book.apply_snapshot(
            &chan(),
            DepthSnapshot {
                asks: vec![lvl(dec!(103), dec!(1)), lvl(dec!(101), dec!(0)), lvl(dec!(102), dec!(1))],
                bids: vec![lvl(dec!(98), dec!(1)), lvl(dec!(99), dec!(1)), lvl(dec!(99), dec!(4))],
                update_id: 1,
            },
        );

        let s = book.snapshot(&chan()).unwrap();
        assert_eq!(s.asks, vec![lvl(dec!(102), dec!(1)), lvl(dec!(103), dec!(1))]);
        assert_eq!(s.bids, vec![lvl(dec!(99), dec!(4)), lvl(dec!(98), dec!(1))]);
    }

    #[test]
    fn diff_replaces_deletes_and_inserts() {
        let book = DepthBook::default();
        seeded(&book);

        let s = book
            .apply_diff(
                &chan(),
                DepthDiff {
                    asks: vec![lvl(dec!(101), dec!(0)), lvl(dec!(100.5), dec!(4)), lvl(dec!(103), dec!(1))],
                    bids: vec![lvl(dec!(100), dec!(5)), lvl(dec!(98), dec!(1))],
                    update_id: 11,
                    previous_update_id: 10,
                    checksum: None,
                },
            )
            .unwrap();

        assert_eq!(
            s.asks,
            vec![
                lvl(dec!(100.5), dec!(4)),
                lvl(dec!(102), dec!(1)),
                lvl(dec!(103), dec!(1)),
                lvl(dec!(104), dec!(3)),
            ]
        );
        assert_eq!(
            s.bids,
            vec![
                lvl(dec!(100), dec!(5)),
                lvl(dec!(99), dec!(1)),
                lvl(dec!(98), dec!(1)),
                lvl(dec!(97), dec!(3)),
            ]
        );
        assert_eq!(s.last_update_id, 11);
    }

    #[test]
    fn deleting_unknown_price_is_a_no_op() {
        let book = DepthBook::default();
        seeded(&book);

        let s = book
            .apply_diff(
                &chan(),
                DepthDiff {
                    asks: vec![lvl(dec!(150), dec!(0))],
                    update_id: 11,
                    previous_update_id: 10,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(s.asks.len(), 3);
    }

    #[test]
    fn gap_discards_channel() {
        let book = DepthBook::default();
        seeded(&book);

        let err = book
            .apply_diff(
                &chan(),
                DepthDiff {
                    update_id: 13,
                    previous_update_id: 12,
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, BookError::SequenceGap { expected: 10, got: 12, .. }));
        assert!(err.requires_resync());
        assert_eq!(book.channel_state(&chan()), ChannelState::Uninitialized);

        // Further diffs are refused until a snapshot arrives.
        let err = book
            .apply_diff(
                &chan(),
                DepthDiff {
                    update_id: 14,
                    previous_update_id: 13,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, BookError::Uninitialized(_)));

        seeded(&book);
        assert_eq!(book.channel_state(&chan()), ChannelState::Synced);
    }

    #[test]
    fn valid_checksum_is_accepted_and_kept() {
        let book = DepthBook::default();
        seeded(&book);

        let bids = [lvl(dec!(100), dec!(2)), lvl(dec!(99), dec!(1)), lvl(dec!(97), dec!(3))];
        let asks = [lvl(dec!(101), dec!(2)), lvl(dec!(102), dec!(7)), lvl(dec!(104), dec!(3))];
        let checksum = depth_checksum(&bids, &asks);

        let s = book
            .apply_diff(
                &chan(),
                DepthDiff {
                    asks: vec![lvl(dec!(102), dec!(7))],
                    update_id: 11,
                    previous_update_id: 10,
                    checksum: Some(checksum),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(s.checksum, Some(checksum));
    }

    #[test]
    fn corrupted_level_fails_checksum() {
        let book = DepthBook::default();
        seeded(&book);

        // Venue's view has 102 at qty 7; compute its checksum over a corrupted
        // quantity so the merged book cannot match.
        let bids = [lvl(dec!(100), dec!(2)), lvl(dec!(99), dec!(1)), lvl(dec!(97), dec!(3))];
        let asks = [lvl(dec!(101), dec!(2)), lvl(dec!(102), dec!(8)), lvl(dec!(104), dec!(3))];
        let checksum = depth_checksum(&bids, &asks);

        let err = book
            .apply_diff(
                &chan(),
                DepthDiff {
                    asks: vec![lvl(dec!(102), dec!(7))],
                    update_id: 11,
                    previous_update_id: 10,
                    checksum: Some(checksum),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, BookError::ChecksumMismatch { .. }));
        assert_eq!(book.channel_state(&chan()), ChannelState::Uninitialized);
    }

    #[test]
    fn output_is_capped() {
        let book = DepthBook::new(3);
        seeded(&book);

        let s = book
            .apply_diff(
                &chan(),
                DepthDiff {
                    asks: vec![lvl(dec!(100.1), dec!(1)), lvl(dec!(100.2), dec!(1))],
                    update_id: 11,
                    previous_update_id: 10,
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(s.asks.len(), 3);
        assert_eq!(s.asks[2].price, dec!(101));
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_feed_reads_as_stale() {
        let book = DepthBook::default();
        seeded(&book);

        assert!(book.get_depth(&chan(), Duration::from_secs(5)).is_ok());

        tokio::time::advance(Duration::from_secs(6)).await;

        let err = book.get_depth(&chan(), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, BookError::Stale { .. }));
        assert!(!err.requires_resync());
    }

    #[test]
    fn readers_keep_their_snapshot() {
        let book = DepthBook::default();
        seeded(&book);

        let before = book.snapshot(&chan()).unwrap();
        book.apply_diff(
            &chan(),
            DepthDiff {
                asks: vec![lvl(dec!(101), dec!(0))],
                update_id: 11,
                previous_update_id: 10,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(before.asks.len(), 3);
        assert_eq!(book.snapshot(&chan()).unwrap().asks.len(), 2);
    }

    #[test]
    fn invalidate_venue_only_touches_that_venue() {
        let book = DepthBook::default();
        seeded(&book);
        let other = Channel::new("binance", Pair::new("eth", "usdt"));
        book.apply_snapshot(&other, DepthSnapshot::default());

        let dropped = book.invalidate_venue("okex");

        assert_eq!(dropped, vec![chan()]);
        assert_eq!(book.channel_state(&chan()), ChannelState::Uninitialized);
        assert_eq!(book.channel_state(&other), ChannelState::Synced);
        assert_eq!(book.channels(), vec![other]);
    }
}
