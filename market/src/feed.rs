//! Feed read loop.
//!
//! One [`FeedRunner`] per venue connection consumes that connection's
//! messages in arrival order and is the only writer of the venue's channels
//! in the [`DepthBook`]. Integrity failures never patch forward: the channel
//! is discarded and a [`ResyncRequest`] goes back to the venue client, which
//! re-subscribes and eventually delivers a fresh snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{Instrument, debug, info, warn};

use common::logger::channel_span;

use crate::book::{BookError, DepthBook, DepthDiff, DepthSnapshot};
use crate::types::{Channel, Pair};

/// Message pushed by a venue connection.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Snapshot { pair: Pair, snapshot: DepthSnapshot },
    Diff { pair: Pair, diff: DepthDiff },
    Connected,
    LostConnection,
}

/// Ask the venue client for a fresh snapshot of a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ResyncRequest {
    pub channel: Channel,
    pub reason: String,
}

pub struct FeedRunner {
    venue: String,
    book: Arc<DepthBook>,
    resync_tx: Sender<ResyncRequest>,

    /// Pairs discarded and waiting for a snapshot. Diffs for them are
    /// dropped without asking again.
    awaiting_snapshot: HashSet<Pair>,
}

impl FeedRunner {
    pub fn new(venue: impl Into<String>, book: Arc<DepthBook>, resync_tx: Sender<ResyncRequest>) -> Self {
        Self {
            venue: venue.into(),
            book,
            resync_tx,
            awaiting_snapshot: HashSet::new(),
        }
    }

    /// Consume the connection's messages until the sender side closes.
    pub async fn run(mut self, mut rx: Receiver<FeedMessage>) {
        let span = channel_span(&self.venue);

        async move {
            info!(component = "feed", event = "startup", "Feed loop started");

            while let Some(msg) = rx.recv().await {
                self.handle(msg).await;
            }

            let dropped = self.book.invalidate_venue(&self.venue);
            warn!(
                component = "feed",
                event = "shutdown",
                channels = dropped.len(),
                "Feed closed; venue books discarded"
            );
        }
        .instrument(span)
        .await
    }

    pub async fn handle(&mut self, msg: FeedMessage) {
        match msg {
            FeedMessage::Snapshot { pair, snapshot } => {
                let channel = self.channel(&pair);
                self.book.apply_snapshot(&channel, snapshot);
                if self.awaiting_snapshot.remove(&pair) {
                    info!(component = "feed", event = "resynced", %channel);
                }
            }

            FeedMessage::Diff { pair, diff } => {
                if self.awaiting_snapshot.contains(&pair) {
                    debug!(component = "feed", %pair, update_id = diff.update_id, "Dropping diff while awaiting snapshot");
                    return;
                }

                let channel = self.channel(&pair);
                if let Err(e) = self.book.apply_diff(&channel, diff) {
                    self.on_integrity_error(pair, channel, e).await;
                }
            }

            FeedMessage::Connected => {
                info!(component = "feed", event = "connected", "Venue connected");
            }

            FeedMessage::LostConnection => {
                let dropped = self.book.invalidate_venue(&self.venue);
                // The client re-subscribes on reconnect; no explicit request needed.
                self.awaiting_snapshot
                    .extend(dropped.iter().map(|c| c.pair.clone()));
                warn!(
                    component = "feed",
                    event = "lost_connection",
                    channels = dropped.len(),
                    "Connection lost; books discarded until reconnect"
                );
            }
        }
    }

    async fn on_integrity_error(&mut self, pair: Pair, channel: Channel, error: BookError) {
        if !error.requires_resync() {
            return;
        }

        warn!(component = "feed", event = "resync_required", %channel, error = %error);
        self.awaiting_snapshot.insert(pair);

        let req = ResyncRequest {
            channel,
            reason: error.to_string(),
        };
        if self.resync_tx.send(req).await.is_err() {
            warn!(component = "feed", event = "resync_send_error", "Resync receiver closed");
        }
    }

    fn channel(&self, pair: &Pair) -> Channel {
        Channel::new(self.venue.clone(), pair.clone())
    }
}
