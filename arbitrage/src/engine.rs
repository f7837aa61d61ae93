//! The arbitrage coordinator.
//!
//! On every tick, for each configured pair:
//!   1. Reads the reference (mid) price of both legs from the depth book.
//!   2. Closes open positions on stop-loss or convergence.
//!   3. Otherwise opens a position when the divergence exceeds the pair's
//!      open threshold.
//!
//! Both legs of an open or close run concurrently as executor tasks and are
//! always joined; the pair is never left with one leg open and a record that
//! says `Open`. When an open half-fails, every filled leg is compensated;
//! anything that cannot be confirmed flat goes to the ledger as `Error`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{Instrument, debug, error, info, warn};

use common::BatchId;
use common::logger::batch_span;
use common::time::now_ms;
use executor::{OrderExecutionCoordinator, TradeConfig, TradeResult};
use ledger::store::FundStore;
use ledger::{FundLedger, FundRecord, FundStatus, LegFill};
use market::DepthBook;
use market::types::Channel;
use market::venue::{TradeSide, VenueClient};

use crate::config::{ArbitrageConfig, PairThresholds};
use crate::policy::{CloseReason, OpenDirection, close_reason, divergence_pct, should_open};
use crate::state::{FailedBatch, OpenLeg, OpenPosition, PositionBook};
use crate::types::{CoordinatorStatus, Leg, StatusReport};

pub struct ArbitrageCoordinator<S: FundStore> {
    cfg: ArbitrageConfig,
    book: Arc<DepthBook>,
    venues: HashMap<String, Arc<dyn VenueClient>>,
    executor: Arc<OrderExecutionCoordinator>,
    ledger: FundLedger<S>,

    positions: PositionBook,
    status: CoordinatorStatus,
    persistence_failures: u64,
    status_tx: watch::Sender<StatusReport>,
}

impl<S: FundStore> ArbitrageCoordinator<S> {
    pub fn new(
        cfg: ArbitrageConfig,
        book: Arc<DepthBook>,
        venues: Vec<Arc<dyn VenueClient>>,
        executor: Arc<OrderExecutionCoordinator>,
        ledger: FundLedger<S>,
    ) -> Self {
        let venues = venues
            .into_iter()
            .map(|v| (v.name().to_string(), v))
            .collect();
        let (status_tx, _) = watch::channel(StatusReport::default());

        Self {
            cfg,
            book,
            venues,
            executor,
            ledger,
            positions: PositionBook::new(),
            status: CoordinatorStatus::Idle,
            persistence_failures: 0,
            status_tx,
        }
    }

    /// Reload every `Open` ledger record into memory. Call before `run`.
    pub async fn recover(&mut self) -> anyhow::Result<usize> {
        let records = self.ledger.open_records().await?;
        let mut restored = 0;

        for record in records {
            if self.positions.contains_batch(record.batch) {
                continue;
            }
            let Some(position) = OpenPosition::from_record(&record) else {
                warn!(
                    component = "arbitrage",
                    event = "recover_skipped",
                    batch_id = %record.batch,
                    legs = record.venues.len(),
                    "Open record is not a two-leg position"
                );
                continue;
            };
            if self.cfg.thresholds(&position.pair).is_none() {
                warn!(component = "arbitrage", event = "recover_unconfigured", batch_id = %record.batch, pair = %position.pair);
            }
            self.positions.insert(position);
            restored += 1;
        }

        self.reconcile_failed().await?;

        info!(
            component = "arbitrage",
            event = "recovered",
            positions = restored,
            failed_batches = self.positions.failed().len()
        );
        self.publish();
        Ok(restored)
    }

    /// Sync the error set with the ledger: adopt `Error` records this process
    /// does not know about and drop batches an operator has since resolved.
    /// A batch whose record never made it to the ledger stays in the set.
    /// Returns the number of batches dropped.
    pub async fn reconcile_failed(&mut self) -> anyhow::Result<usize> {
        for record in self.ledger.failed_positions().await? {
            if !self.positions.is_failed(record.batch) {
                self.positions.fail(FailedBatch {
                    batch_id: record.batch,
                    pair: record.pair.clone(),
                    note: record.note.clone().unwrap_or_default(),
                });
            }
        }

        let mut resolved = Vec::new();
        for failed in self.positions.failed() {
            if let Some(record) = self.ledger.get(failed.batch_id).await? {
                if record.status != FundStatus::Error {
                    resolved.push(failed.batch_id);
                }
            }
        }

        let dropped = self.positions.retain_failed(|f| !resolved.contains(&f.batch_id));
        if dropped > 0 {
            info!(
                component = "arbitrage",
                event = "failed_resolved",
                resolved = dropped,
                remaining = self.positions.failed().len()
            );
            self.publish();
        }
        Ok(dropped)
    }

    /// Tick until `shutdown` resolves. A tick in progress always completes.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        let mut ticker = interval(self.cfg.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        self.set_status(CoordinatorStatus::Watching);
        info!(component = "arbitrage", event = "startup", pairs = self.cfg.pairs.len());

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        self.set_status(CoordinatorStatus::Idle);
        info!(component = "arbitrage", event = "shutdown", open_positions = self.positions.open_len());
    }

    /// One watch pass over every configured pair.
    pub async fn tick(&mut self) {
        if self.status == CoordinatorStatus::Idle {
            self.set_status(CoordinatorStatus::Watching);
        }

        // Pick up operator resolutions while anything is outstanding.
        if !self.positions.failed().is_empty() {
            if let Err(e) = self.reconcile_failed().await {
                self.persistence_failed("reconcile_failed", &e);
            }
        }

        for i in 0..self.cfg.pairs.len() {
            let thresholds = self.cfg.pairs[i].clone();
            self.tick_pair(&thresholds).await;
        }
    }

    async fn tick_pair(&mut self, t: &PairThresholds) {
        let prices = match self.reference_prices(t) {
            Some(prices) => prices,
            None => return,
        };
        let Some(divergence) = divergence_pct(prices[0], prices[1]) else {
            return;
        };

        let open = self.positions.indices_for(&t.pair);
        if !open.is_empty() {
            for index in open {
                let reason = match self.positions.get(index) {
                    Some(position) => close_reason(position, prices, t),
                    None => None,
                };
                if let Some(reason) = reason {
                    self.close(index, t, prices, reason).await;
                }
            }
            return;
        }

        if let Some(direction) = should_open(divergence, t) {
            self.open(t, prices, divergence, direction).await;
        } else {
            debug!(component = "arbitrage", event = "watch", pair = %t.pair, %divergence);
        }
    }

    /// Mid prices of leg A and leg B, if both books are fresh.
    fn reference_prices(&self, t: &PairThresholds) -> Option<[Decimal; 2]> {
        let price = |leg: &Leg| -> Option<Decimal> {
            let channel = Channel::new(leg.venue.clone(), t.pair.clone());
            match self.book.get_depth(&channel, self.cfg.depth_staleness) {
                Ok(depth) => depth.mid_price(),
                Err(e) => {
                    debug!(component = "arbitrage", event = "no_reference", %channel, error = %e);
                    None
                }
            }
        };
        Some([price(&t.legs[0])?, price(&t.legs[1])?])
    }

    fn venue(&self, name: &str) -> Option<Arc<dyn VenueClient>> {
        self.venues.get(name).cloned()
    }

    fn trade_config(
        &self,
        batch_id: BatchId,
        t: &PairThresholds,
        venue: &str,
        side: TradeSide,
        target_price: Decimal,
        amount: Decimal,
    ) -> Option<TradeConfig> {
        let Some(client) = self.venue(venue) else {
            error!(component = "arbitrage", event = "unknown_venue", venue, "No client registered for venue");
            return None;
        };
        Some(TradeConfig {
            batch_id,
            venue: client,
            pair: t.pair.clone(),
            side,
            target_price,
            amount,
            slippage_limit: t.slippage_limit,
        })
    }

    async fn open(&mut self, t: &PairThresholds, prices: [Decimal; 2], divergence: Decimal, direction: OpenDirection) {
        let batch_id = BatchId::new();
        let span = batch_span(&batch_id, &t.pair.to_string());

        async {
            self.set_status(CoordinatorStatus::Opening);
            info!(
                component = "arbitrage",
                event = "open_trigger",
                %divergence,
                price_a = %prices[0],
                price_b = %prices[1],
                direction = ?direction,
            );

            let sides = [
                t.legs[0].kind.open_side(direction.is_long(0)),
                t.legs[1].kind.open_side(direction.is_long(1)),
            ];
            let configs = [
                self.trade_config(batch_id, t, &t.legs[0].venue, sides[0], prices[0], t.amount),
                self.trade_config(batch_id, t, &t.legs[1].venue, sides[1], prices[1], t.amount),
            ];
            let [Some(config_a), Some(config_b)] = configs else {
                self.settle_status();
                return;
            };

            let results = self.run_pair(config_a.clone(), config_b.clone()).await;
            let now = now_ms();

            if results[0].is_success() && results[1].is_success() {
                let legs = [0, 1].map(|i| OpenLeg {
                    venue: t.legs[i].venue.clone(),
                    kind: t.legs[i].kind,
                    side: sides[i],
                    amount: results[i].deal_amount,
                    open_price: results[i].avg_price,
                    open_time_ms: now,
                });
                let position = OpenPosition {
                    batch_id,
                    pair: t.pair.clone(),
                    legs,
                    open_timestamp_ms: now,
                };

                if let Err(e) = self.ledger.record_open(batch_id, t.pair.clone(), &position.leg_fills()).await {
                    self.persistence_failed("record_open", &e);
                }
                self.positions.insert(position);
                info!(component = "arbitrage", event = "opened", "Position opened");
            } else {
                self.unwind_open(batch_id, t, [config_a, config_b], results).await;
            }

            self.settle_status();
        }
        .instrument(span)
        .await
    }

    /// Compensate every filled leg of a half-failed open.
    async fn unwind_open(&mut self, batch_id: BatchId, t: &PairThresholds, configs: [TradeConfig; 2], results: [TradeResult; 2]) {
        let unknown = results.iter().any(TradeResult::is_unknown_state);
        let filled = results.iter().filter(|r| r.has_fill()).count();

        warn!(
            component = "arbitrage",
            event = "open_failed",
            leg_a = ?results[0].error,
            leg_b = ?results[1].error,
            filled_legs = filled,
            unknown_state = unknown,
        );

        if filled == 0 && !unknown {
            info!(component = "arbitrage", event = "discarded", "Neither leg filled; batch discarded");
            return;
        }

        let mut compensations: [Option<TradeResult>; 2] = [None, None];
        let mut all_confirmed = true;

        for (i, (config, result)) in configs.iter().zip(&results).enumerate() {
            if !result.has_fill() {
                continue;
            }

            // Unwind at the current price; fall back to the fill price.
            let target = self
                .reference_prices(t)
                .map(|p| p[i])
                .unwrap_or(result.avg_price);
            let reverse = TradeConfig {
                side: config.side.reverse(),
                target_price: target,
                amount: result.deal_amount,
                ..config.clone()
            };

            let outcome = self.executor.run(reverse).await;
            if !outcome.is_success() {
                all_confirmed = false;
            }
            info!(
                component = "arbitrage",
                event = "compensated",
                leg = i,
                error = ?outcome.error,
                deal_amount = %outcome.deal_amount,
            );
            compensations[i] = Some(outcome);
        }

        if all_confirmed && !unknown {
            info!(component = "arbitrage", event = "flat", "Filled legs compensated; nothing open");
            return;
        }

        let now = now_ms();
        let opens: Vec<LegFill> = (0..2)
            .map(|i| LegFill {
                venue: t.legs[i].venue.clone(),
                kind: t.legs[i].kind,
                side: configs[i].side,
                price: results[i].avg_price,
                amount: results[i].deal_amount,
                time_ms: now,
            })
            .collect();
        let closes: Vec<LegFill> = (0..2)
            .map(|i| {
                let (price, amount) = compensations[i]
                    .as_ref()
                    .map(|c| (c.avg_price, c.deal_amount))
                    .unwrap_or((Decimal::ZERO, Decimal::ZERO));
                LegFill {
                    venue: t.legs[i].venue.clone(),
                    kind: t.legs[i].kind,
                    side: configs[i].side.reverse(),
                    price,
                    amount,
                    time_ms: now,
                }
            })
            .collect();

        let note = format!(
            "open failed: leg A {}, leg B {}; compensation {}",
            describe(&results[0]),
            describe(&results[1]),
            if all_confirmed { "confirmed" } else { "unconfirmed" },
        );

        let mut record = FundRecord::opened(batch_id, t.pair.clone(), &opens, FundStatus::Error, now);
        record.set_closes(&closes);
        self.fail_batch(record, note).await;
    }

    async fn close(&mut self, index: u64, t: &PairThresholds, prices: [Decimal; 2], reason: CloseReason) {
        let Some(position) = self.positions.get(index).cloned() else {
            return;
        };
        let span = batch_span(&position.batch_id, &t.pair.to_string());

        async {
            self.set_status(CoordinatorStatus::Closing);
            info!(component = "arbitrage", event = "close_trigger", reason = ?reason);

            let configs = [0, 1].map(|i| {
                let leg = &position.legs[i];
                self.trade_config(position.batch_id, t, &leg.venue, leg.side.reverse(), prices[i], leg.amount)
            });
            let [Some(config_a), Some(config_b)] = configs else {
                let record = FundRecord::opened(
                    position.batch_id,
                    position.pair.clone(),
                    &position.leg_fills(),
                    FundStatus::Error,
                    now_ms(),
                );
                self.fail_batch(record, "close failed: venue client missing".to_string()).await;
                self.positions.remove(index);
                self.settle_status();
                return;
            };

            let results = self.run_pair(config_a, config_b).await;
            let now = now_ms();
            let closes: Vec<LegFill> = (0..2)
                .map(|i| LegFill {
                    venue: position.legs[i].venue.clone(),
                    kind: position.legs[i].kind,
                    side: position.legs[i].side.reverse(),
                    price: results[i].avg_price,
                    amount: results[i].deal_amount,
                    time_ms: now,
                })
                .collect();

            // Ledger first; the in-memory position goes only once the write settled.
            if results.iter().all(TradeResult::is_success) {
                match self.ledger.record_close(position.batch_id, &closes).await {
                    Ok(record) => info!(
                        component = "arbitrage",
                        event = "closed",
                        pnl = %record.total_pnl(),
                        "Position closed"
                    ),
                    Err(e) => self.persistence_failed("record_close", &e),
                }
            } else {
                let note = format!(
                    "close failed: leg A {}, leg B {}",
                    describe(&results[0]),
                    describe(&results[1]),
                );
                let mut record = FundRecord::opened(
                    position.batch_id,
                    position.pair.clone(),
                    &position.leg_fills(),
                    FundStatus::Error,
                    now,
                );
                record.set_closes(&closes);
                self.fail_batch(record, note).await;
            }
            self.positions.remove(index);

            self.settle_status();
        }
        .instrument(span)
        .await
    }

    /// Run both legs as independent tasks and wait for both.
    async fn run_pair(&self, a: TradeConfig, b: TradeConfig) -> [TradeResult; 2] {
        let leg_a = self.executor.spawn(a);
        let leg_b = self.executor.spawn(b);
        let (ra, rb) = tokio::join!(leg_a.wait(), leg_b.wait());
        [ra, rb]
    }

    async fn fail_batch(&mut self, record: FundRecord, note: String) {
        error!(
            component = "arbitrage",
            event = "batch_error",
            batch_id = %record.batch,
            note = %note,
            "Batch needs manual reconciliation"
        );

        self.positions.fail(FailedBatch {
            batch_id: record.batch,
            pair: record.pair.clone(),
            note: note.clone(),
        });

        if let Err(e) = self.ledger.mark_error(record, note).await {
            self.persistence_failed("mark_error", &e);
        }
    }

    fn persistence_failed(&mut self, op: &'static str, e: &anyhow::Error) {
        self.persistence_failures += 1;
        error!(
            component = "arbitrage",
            event = "ledger_error",
            op,
            error = %e,
            failures = self.persistence_failures,
            open_positions = self.positions.open_len(),
        );
        self.publish();
    }

    fn set_status(&mut self, status: CoordinatorStatus) {
        self.status = status;
        self.publish();
    }

    /// Back to watching after an open/close.
    fn settle_status(&mut self) {
        self.set_status(CoordinatorStatus::Watching);
    }

    /// Worst known state: an unresolved failed batch dominates.
    pub fn status(&self) -> StatusReport {
        let status = if self.positions.failed().is_empty() {
            self.status
        } else {
            CoordinatorStatus::Error
        };
        StatusReport {
            status,
            open_positions: self.positions.open_len(),
            failed_batches: self.positions.failed().len(),
            persistence_failures: self.persistence_failures,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.status_tx.subscribe()
    }

    pub fn open_positions(&self) -> Vec<OpenPosition> {
        self.positions.open_positions()
    }

    /// Batches this process could not unwind.
    pub fn failed_batches(&self) -> &[FailedBatch] {
        self.positions.failed()
    }

    /// Every `Error` record in the ledger, including earlier runs.
    pub async fn failed_positions(&self) -> anyhow::Result<Vec<FundRecord>> {
        self.ledger.failed_positions().await
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }
}

fn describe(result: &TradeResult) -> String {
    match result.error {
        None => format!("filled {} @ {}", result.deal_amount, result.avg_price),
        Some(kind) => format!("{} after {} @ {}", kind, result.deal_amount, result.avg_price),
    }
}
