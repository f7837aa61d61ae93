use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::time::Instant;

use common::BatchId;
use executor::{ExecutionConfig, OrderExecutionCoordinator, TradeConfig, TradeErrorKind};
use market::DepthBook;
use market::book::DepthSnapshot;
use market::types::{Channel, DepthLevel, Pair};
use market::venue::{OrderStatus, TradeSide, VenueError};

use mock_venue::{OrderScript, ScriptedVenue, info};

const VENUE: &str = "okex";

fn pair() -> Pair {
    Pair::new("eth", "usdt")
}

fn book() -> Arc<DepthBook> {
    let book = Arc::new(DepthBook::default());
    book.apply_snapshot(
        &Channel::new(VENUE, pair()),
        DepthSnapshot {
            asks: vec![
                DepthLevel::new(dec!(100), dec!(2)),
                DepthLevel::new(dec!(101), dec!(10)),
            ],
            bids: vec![
                DepthLevel::new(dec!(99), dec!(5)),
                DepthLevel::new(dec!(98), dec!(10)),
            ],
            update_id: 1,
        },
    );
    book
}

fn coordinator() -> OrderExecutionCoordinator {
    let cfg = ExecutionConfig {
        // Paused clock jumps freely; keep the book valid throughout.
        max_depth_staleness: Duration::from_secs(3600),
        ..ExecutionConfig::default()
    };
    OrderExecutionCoordinator::new(book(), cfg)
}

fn trade(venue: &Arc<ScriptedVenue>, side: TradeSide, target: Decimal, amount: Decimal) -> TradeConfig {
    TradeConfig {
        batch_id: BatchId::new(),
        venue: venue.clone(),
        pair: pair(),
        side,
        target_price: target,
        amount,
        slippage_limit: dec!(0.01),
    }
}

#[tokio::test(start_paused = true)]
async fn fills_on_first_poll() {
    let venue = Arc::new(ScriptedVenue::new(VENUE, vec![OrderScript::filled(dec!(1), dec!(100))]));

    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(100), dec!(1)))
        .await;

    assert!(result.is_success());
    assert_eq!(result.deal_amount, dec!(1));
    assert_eq!(result.avg_price, dec!(100));
    assert_eq!(result.orders_placed, 1);
    assert_eq!(result.order_id.as_deref(), Some("okex-1"));
    assert!(venue.cancels.lock().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn sells_are_priced_off_bids() {
    let venue = Arc::new(ScriptedVenue::new(VENUE, vec![OrderScript::filled(dec!(3), dec!(99))]));

    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenShort, dec!(99), dec!(3)))
        .await;

    assert!(result.is_success());
    let submitted = venue.submitted.lock().await;
    assert_eq!(submitted[0].price, dec!(99));
    assert_eq!(submitted[0].side, TradeSide::OpenShort);
}

#[tokio::test(start_paused = true)]
async fn partial_fills_are_aggregated_across_orders() {
    let venue = Arc::new(ScriptedVenue::new(
        VENUE,
        vec![
            OrderScript::partial(dec!(1), dec!(100)),
            OrderScript::partial(dec!(2), dec!(101)),
            OrderScript::filled(dec!(3), dec!(102)),
        ],
    ));

    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(101), dec!(6)))
        .await;

    assert!(result.is_success());
    assert_eq!(result.deal_amount, dec!(6));
    assert_eq!(result.avg_price, dec!(608) / dec!(6));
    assert_eq!(result.orders_placed, 3);

    let amounts: Vec<_> = venue.submitted.lock().await.iter().map(|o| o.amount).collect();
    assert_eq!(amounts, vec![dec!(6), dec!(5), dec!(3)]);
    assert_eq!(venue.cancels.lock().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn refused_cancel_on_filled_order_counts_as_fill() {
    let mut script = OrderScript::partial(dec!(0.5), dec!(100));
    script.cancel = Err(VenueError::Rejected("order already filled".into()));
    script.after_cancel = Ok(info(OrderStatus::Filled, dec!(1), dec!(100)));
    let venue = Arc::new(ScriptedVenue::new(VENUE, vec![script]));

    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(100), dec!(1)))
        .await;

    assert!(result.is_success());
    assert_eq!(result.deal_amount, dec!(1));
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_cancel_stops_with_partial_fill() {
    let mut script = OrderScript::partial(dec!(0.4), dec!(100));
    script.cancel = Err(VenueError::Transport("timeout".into()));
    script.after_cancel = Ok(info(OrderStatus::PartiallyFilled, dec!(0.4), dec!(100)));
    let venue = Arc::new(ScriptedVenue::new(
        VENUE,
        vec![script, OrderScript::filled(dec!(0.6), dec!(100))],
    ));

    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(100), dec!(1)))
        .await;

    assert_eq!(result.error, Some(TradeErrorKind::CancelFailed));
    assert!(result.is_unknown_state());
    assert_eq!(result.deal_amount, dec!(0.4));
    assert_eq!(venue.submitted.lock().await.len(), 1, "no order after an unknown state");
}

#[tokio::test(start_paused = true)]
async fn failed_post_cancel_read_is_unknown_state() {
    let mut script = OrderScript::partial(dec!(0.2), dec!(100));
    script.after_cancel = Err(VenueError::Transport("connection reset".into()));
    let venue = Arc::new(ScriptedVenue::new(VENUE, vec![script]));

    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(100), dec!(1)))
        .await;

    assert_eq!(result.error, Some(TradeErrorKind::CancelFailed));
    assert_eq!(result.deal_amount, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn price_outside_slippage_never_submits() {
    let venue = Arc::new(ScriptedVenue::new(VENUE, vec![OrderScript::filled(dec!(1), dec!(100))]));
    let started = Instant::now();

    // Asks start at 100; a 90 target with 1% slippage caps buys at 90.9.
    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(90), dec!(1)))
        .await;

    assert_eq!(result.error, Some(TradeErrorKind::InvalidDepth));
    assert!(!result.has_fill());
    assert!(venue.submitted.lock().await.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn rejection_is_retried() {
    let venue = Arc::new(ScriptedVenue::new(
        VENUE,
        vec![
            OrderScript::rejected("insufficient margin"),
            OrderScript::filled(dec!(1), dec!(100)),
        ],
    ));

    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(100), dec!(1)))
        .await;

    assert!(result.is_success());
    assert_eq!(result.orders_placed, 1);
    assert_eq!(venue.submitted.lock().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn transport_error_on_submit_is_unconfirmed() {
    let mut script = OrderScript::filled(dec!(1), dec!(100));
    script.submit = Err(VenueError::Transport("gateway timeout".into()));
    let venue = Arc::new(ScriptedVenue::new(VENUE, vec![script, OrderScript::filled(dec!(1), dec!(100))]));

    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(100), dec!(1)))
        .await;

    assert_eq!(result.error, Some(TradeErrorKind::Unconfirmed));
    assert_eq!(venue.submitted.lock().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn budget_exhaustion_returns_partial_fill() {
    let scripts = (0..20).map(|_| OrderScript::partial(dec!(1), dec!(100))).collect();
    let venue = Arc::new(ScriptedVenue::new(VENUE, scripts));
    let started = Instant::now();

    // The book holds 12 on the ask side, so every residual stays priceable.
    let result = coordinator()
        .run(trade(&venue, TradeSide::OpenLong, dec!(101), dec!(12)))
        .await;

    // Ten one-second polls per order inside a 60s budget.
    assert_eq!(result.error, Some(TradeErrorKind::Timeout));
    assert_eq!(result.orders_placed, 6);
    assert_eq!(result.deal_amount, dec!(6));
    assert_eq!(result.avg_price, dec!(100));
    assert_eq!(venue.cancels.lock().await.len(), 6);
    assert!(started.elapsed() <= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn spawned_leg_reports_through_handle() {
    let venue = Arc::new(ScriptedVenue::new(VENUE, vec![OrderScript::filled(dec!(2), dec!(99))]));
    let coordinator = Arc::new(coordinator());

    let pending = coordinator.spawn(trade(&venue, TradeSide::Sell, dec!(99), dec!(2)));
    let result = pending.wait().await;

    assert!(result.is_success());
    assert_eq!(result.deal_amount, dec!(2));
}
