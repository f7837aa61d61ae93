//! Single-leg order execution.
//!
//! The coordinator turns one [`TradeConfig`] into as many limit orders as it
//! takes to fill the requested amount or exhaust the wall budget:
//!
//!   1. price the residual against the current depth book
//!   2. submit, then poll the order status at a fixed interval
//!   3. cancel after `max_polls` reads and re-read the order once more
//!   4. fold the confirmed fill into the aggregate and go again
//!
//! The status read after a cancel is the source of truth. A cancel the venue
//! refuses is fine if the order turns out to be terminal anyway (it filled
//! in the meantime); if it is still live, the run stops with
//! [`TradeErrorKind::CancelFailed`] and no further order is placed.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, error, info, info_span, warn};

use market::DepthBook;
use market::estimator::{FillTarget, estimate_fill};
use market::venue::{OrderInfo, OrderRequest, VenueError};

use crate::types::{ExecutionConfig, FillAggregate, PriceError, TradeConfig, TradeErrorKind, TradeResult};

/// How one order ended.
enum OrderOutcome {
    /// The venue confirmed the order can no longer fill.
    Settled(OrderInfo),
    /// The order may still be live; the last known cumulative state is
    /// attached when there is one.
    Unknown(Option<OrderInfo>),
}

pub struct OrderExecutionCoordinator {
    book: Arc<DepthBook>,
    cfg: ExecutionConfig,
}

impl OrderExecutionCoordinator {
    pub fn new(book: Arc<DepthBook>, cfg: ExecutionConfig) -> Self {
        Self { book, cfg }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.cfg
    }

    /// Run `trade` on its own task. The returned handle resolves exactly once.
    pub fn spawn(self: &Arc<Self>, trade: TradeConfig) -> PendingTrade {
        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        let span = info_span!(
            "leg",
            venue = %trade.venue.name(),
            pair = %trade.pair,
            side = %trade.side,
        );

        tokio::spawn(
            async move {
                let result = this.run(trade).await;
                if tx.send(result).is_err() {
                    warn!(component = "executor", event = "result_dropped", "Caller stopped waiting for leg result");
                }
            }
            .instrument(span),
        );

        PendingTrade { rx }
    }

    /// Execute `trade` to completion on the current task.
    pub async fn run(&self, trade: TradeConfig) -> TradeResult {
        let deadline = Instant::now() + self.cfg.wall_budget;

        let mut fills = FillAggregate::default();
        let mut last_error: Option<TradeErrorKind> = None;
        let mut order_id: Option<String> = None;
        let mut orders_placed = 0u32;

        info!(
            component = "executor",
            event = "start",
            amount = %trade.amount,
            target_price = %trade.target_price,
            bound = %trade.price_bound(),
        );

        let error = loop {
            let residual = trade.amount - fills.amount;
            if residual <= Decimal::ZERO {
                break None;
            }
            if Instant::now() >= deadline {
                break Some(exhausted_error(last_error, &fills));
            }

            let price = match self.placement_price(&trade, residual) {
                Ok(price) => price,
                Err(e) => {
                    debug!(component = "executor", event = "no_price", reason = %e, %residual);
                    last_error = Some(TradeErrorKind::InvalidDepth);
                    self.pause(deadline).await;
                    continue;
                }
            };

            let request = OrderRequest {
                batch_id: trade.batch_id,
                pair: trade.pair.clone(),
                side: trade.side,
                price,
                amount: residual,
            };

            let id = match trade.venue.trade(&request).await {
                Ok(id) => id,
                Err(VenueError::Transport(msg)) => {
                    error!(component = "executor", event = "submit_unconfirmed", error = %msg);
                    break Some(TradeErrorKind::Unconfirmed);
                }
                Err(e) => {
                    warn!(component = "executor", event = "rejected", error = %e, %price, %residual);
                    last_error = Some(TradeErrorKind::TradeRejected);
                    self.pause(deadline).await;
                    continue;
                }
            };

            orders_placed += 1;
            order_id = Some(id.clone());
            debug!(component = "executor", event = "placed", order_id = %id, %price, %residual);

            match self.await_order(&trade, &id, deadline).await {
                OrderOutcome::Settled(info) => {
                    fills.add(info.deal_amount, info.avg_price);
                    debug!(
                        component = "executor",
                        event = "settled",
                        order_id = %id,
                        status = ?info.status,
                        deal_amount = %info.deal_amount,
                    );
                }
                OrderOutcome::Unknown(info) => {
                    if let Some(info) = info {
                        fills.add(info.deal_amount, info.avg_price);
                    }
                    error!(
                        component = "executor",
                        event = "cancel_failed",
                        order_id = %id,
                        filled = %fills.amount,
                        "Order may still be live; stopping"
                    );
                    break Some(TradeErrorKind::CancelFailed);
                }
            }
        };

        let result = TradeResult {
            error,
            deal_amount: fills.amount,
            avg_price: fills.avg_price(),
            order_id,
            orders_placed,
        };

        match result.error {
            None => info!(
                component = "executor",
                event = "filled",
                deal_amount = %result.deal_amount,
                avg_price = %result.avg_price,
                orders = result.orders_placed,
            ),
            Some(kind) => warn!(
                component = "executor",
                event = "incomplete",
                error = %kind,
                deal_amount = %result.deal_amount,
                avg_price = %result.avg_price,
                orders = result.orders_placed,
            ),
        }

        result
    }

    /// Limit price covering `residual` on the book side the order consumes.
    fn placement_price(&self, trade: &TradeConfig, residual: Decimal) -> Result<Decimal, PriceError> {
        let depth = self
            .book
            .get_depth(&trade.channel(), self.cfg.max_depth_staleness)?;

        let side = trade.side.book_side();
        let estimate = estimate_fill(side, depth.side(side), residual, FillTarget::Quantity)?;

        if !trade.accepts_price(estimate.last_price) {
            return Err(PriceError::OutsideSlippage {
                price: estimate.last_price,
                bound: trade.price_bound(),
            });
        }
        Ok(estimate.last_price)
    }

    async fn await_order(&self, trade: &TradeConfig, order_id: &str, deadline: Instant) -> OrderOutcome {
        for poll in 1..=self.cfg.max_polls {
            self.pause(deadline).await;

            match trade.venue.order_info(&trade.pair, order_id).await {
                Ok(info) if info.status.is_terminal() => return OrderOutcome::Settled(info),
                Ok(info) => {
                    debug!(component = "executor", event = "poll", poll, status = ?info.status, deal_amount = %info.deal_amount);
                }
                Err(e) => {
                    warn!(component = "executor", event = "poll_error", poll, error = %e);
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }

        let cancel = trade.venue.cancel_order(&trade.pair, order_id).await;
        let read = trade.venue.order_info(&trade.pair, order_id).await;

        match (cancel, read) {
            (_, Ok(info)) if info.status.is_terminal() => OrderOutcome::Settled(info),
            // Acknowledged cancel; the read may lag the venue's matching engine.
            (Ok(()), Ok(info)) => OrderOutcome::Settled(info),
            (Err(e), Ok(info)) => {
                warn!(component = "executor", event = "cancel_refused", order_id, error = %e, status = ?info.status);
                OrderOutcome::Unknown(Some(info))
            }
            (cancel, Err(e)) => {
                warn!(
                    component = "executor",
                    event = "post_cancel_read_failed",
                    order_id,
                    cancel_ok = cancel.is_ok(),
                    error = %e,
                );
                OrderOutcome::Unknown(None)
            }
        }
    }

    /// Sleep one poll interval, never past `deadline`.
    async fn pause(&self, deadline: Instant) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        sleep(self.cfg.poll_interval.min(deadline - now)).await;
    }
}

/// Error reported when the wall budget runs out with residual left.
fn exhausted_error(last_error: Option<TradeErrorKind>, fills: &FillAggregate) -> TradeErrorKind {
    match last_error {
        Some(kind @ (TradeErrorKind::InvalidDepth | TradeErrorKind::TradeRejected)) if fills.amount.is_zero() => kind,
        _ => TradeErrorKind::Timeout,
    }
}

/// Handle to a leg running on its own task.
pub struct PendingTrade {
    rx: oneshot::Receiver<TradeResult>,
}

impl PendingTrade {
    pub async fn wait(self) -> TradeResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => {
                error!(component = "executor", event = "task_lost", "Leg task ended without a result");
                TradeResult::lost()
            }
        }
    }
}
