use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use swing_trade_core::config::{BrokerConfig, LifecycleConfig};
use swing_trade_core::error::BrokerError;
use swing_trade_core::orders::{OptionContract, OptionType, OrderKind, OrderStatus};
use swing_trade_core::rate_limit::RateLimitedBroker;
use swing_trade_core::retry::RetryPolicy;
use swing_trade_core::traits::{BrokerGateway, TracingSink};
use swing_trade_options_manager::{
    spawn_monitor, LifecycleError, LifecycleEvent, OrderLifecycleManager, PollOutcome,
    PositionState, RiskLevels, SubmitOutcome, TradePlan,
};
use swing_trade_paper::{PaperBroker, PaperOperation};

const SYMBOL: &str = "NIFTY2510923600CE";

fn contract() -> OptionContract {
    OptionContract {
        symbol: SYMBOL.to_string(),
        strike: dec!(23600),
        expiry: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
        option_type: OptionType::Call,
        last_price: dec!(20),
        delta: 0.5,
        gamma: 0.002,
        theta: -6.0,
        vega: 8.0,
        implied_volatility: 15.0,
        open_interest: 250_000,
        bid: dec!(19.95),
        ask: dec!(20.05),
    }
}

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter: Duration::ZERO,
    }
}

fn manager(broker: Arc<dyn BrokerGateway>) -> OrderLifecycleManager {
    OrderLifecycleManager::new(broker, Arc::new(TracingSink), retry(), LifecycleConfig::default())
}

/// Entry filled at 20, stop 14.75 and target 30.50 resting.
async fn monitoring(broker: &Arc<PaperBroker>) -> OrderLifecycleManager {
    let mut m = manager(broker.clone());
    broker.set_price(SYMBOL, dec!(20));
    m.submit_entry("NIFTY-1-17", &contract(), 75, OrderKind::Market)
        .await
        .unwrap();
    assert_eq!(
        m.poll_status().await.unwrap(),
        PollOutcome::Transitioned(PositionState::EntryFilled)
    );
    m.place_protective_orders(dec!(14.75), dec!(30.50))
        .await
        .unwrap();
    assert_eq!(m.position().unwrap().state, PositionState::Monitoring);
    m
}

#[tokio::test]
async fn stop_fill_cancels_target_exactly_once() {
    let broker = Arc::new(PaperBroker::new());
    let mut m = monitoring(&broker).await;
    let target_id = m
        .position()
        .unwrap()
        .target_order
        .as_ref()
        .unwrap()
        .broker_order_id
        .clone();

    broker.set_price(SYMBOL, dec!(14.5));
    assert_eq!(
        m.poll_status().await.unwrap(),
        PollOutcome::Transitioned(PositionState::Closed)
    );
    // further polls and price moves do not cancel again
    broker.set_price(SYMBOL, dec!(40));
    assert_eq!(m.poll_status().await.unwrap(), PollOutcome::Idle);
    assert_eq!(broker.cancel_calls(), vec![target_id.clone()]);
    assert_eq!(broker.order(&target_id).unwrap().status, OrderStatus::Cancelled);

    let exited: Vec<PositionState> = m
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            LifecycleEvent::StateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        exited[exited.len() - 2..],
        [PositionState::ExitedByStop, PositionState::Closed]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_target_cancel_is_retried_before_closing() {
    let broker = Arc::new(PaperBroker::new());
    let mut m = monitoring(&broker).await;
    let target_id = m
        .position()
        .unwrap()
        .target_order
        .as_ref()
        .unwrap()
        .broker_order_id
        .clone();
    for _ in 0..3 {
        broker.inject_failure(PaperOperation::Cancel, BrokerError::transport("gateway down"));
    }

    broker.set_price(SYMBOL, dec!(14.5));
    let err = m.poll_status().await.unwrap_err();
    assert!(matches!(err, LifecycleError::StatusUnknown { ref order_id, .. } if *order_id == target_id));
    assert_eq!(m.position().unwrap().state, PositionState::Monitoring);
    assert!(m.is_position_active());
    assert_eq!(broker.order(&target_id).unwrap().status, OrderStatus::Placed);
    assert!(m
        .drain_events()
        .iter()
        .any(|e| matches!(e, LifecycleEvent::StatusUnknown { .. })));

    assert_eq!(
        m.poll_status().await.unwrap(),
        PollOutcome::Transitioned(PositionState::Closed)
    );
    assert_eq!(broker.order(&target_id).unwrap().status, OrderStatus::Cancelled);
    assert_eq!(broker.cancel_calls().len(), 4);

    // the cancelled target cannot fill after the position closed
    assert_eq!(broker.set_price(SYMBOL, dec!(40)), 0);
    assert_eq!(m.poll_status().await.unwrap(), PollOutcome::Idle);
    assert_eq!(broker.cancel_calls().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn lost_entry_acknowledgement_is_reconciled() {
    let broker = Arc::new(PaperBroker::new());
    let mut m = manager(broker.clone());
    for _ in 0..3 {
        broker.inject_failure(PaperOperation::PlaceAck, BrokerError::transport("reply lost"));
    }

    let outcome = m
        .submit_entry("NIFTY-1-17", &contract(), 75, OrderKind::Limit { price: dec!(19) })
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Unconfirmed { correlation_id: "NIFTY-1-17".into() });
    assert_eq!(broker.orders().len(), 1, "order landed despite the lost reply");
    assert!(m.is_position_active());
    assert_eq!(m.position().unwrap().state, PositionState::EntrySubmitted);
    assert!(m.position().unwrap().entry_order.is_none());

    // a new signal cannot slip past the unconfirmed entry
    let err = m
        .submit_entry("NIFTY-30-44", &contract(), 75, OrderKind::Market)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::PositionActive { .. }));

    assert_eq!(m.poll_status().await.unwrap(), PollOutcome::Unchanged);
    let paper_id = broker.orders()[0].broker_order_id.clone();
    let entry = m.position().unwrap().entry_order.clone().unwrap();
    assert_eq!(entry.broker_order_id, paper_id);
    assert_eq!(broker.orders().len(), 1);

    broker.set_price(SYMBOL, dec!(18.9));
    assert_eq!(
        m.poll_status().await.unwrap(),
        PollOutcome::Transitioned(PositionState::EntryFilled)
    );
    assert_eq!(m.position().unwrap().quantity, 75);
}

#[tokio::test]
async fn target_fill_cancels_stop() {
    let broker = Arc::new(PaperBroker::new());
    let mut m = monitoring(&broker).await;
    let stop_id = m
        .position()
        .unwrap()
        .stop_order
        .as_ref()
        .unwrap()
        .broker_order_id
        .clone();

    broker.set_price(SYMBOL, dec!(31));
    m.poll_status().await.unwrap();

    assert_eq!(broker.cancel_calls(), vec![stop_id]);
    assert!(!m.is_position_active());
    let target = m.position().unwrap().target_order.clone().unwrap();
    assert_eq!(target.status, OrderStatus::Filled);
    assert_eq!(target.filled_price, Some(dec!(31)));
}

#[tokio::test(start_paused = true)]
async fn transient_status_failures_are_retried() {
    let broker = Arc::new(PaperBroker::new());
    let mut m = manager(broker.clone());
    broker.set_price(SYMBOL, dec!(20));
    m.submit_entry("NIFTY-1-17", &contract(), 75, OrderKind::Market)
        .await
        .unwrap();

    broker.inject_failure(PaperOperation::Status, BrokerError::transport("reset"));
    broker.inject_failure(
        PaperOperation::Status,
        BrokerError::rate_limited(Duration::from_millis(250)),
    );
    assert_eq!(
        m.poll_status().await.unwrap(),
        PollOutcome::Transitioned(PositionState::EntryFilled)
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_status_retries_keep_last_known_state() {
    let broker = Arc::new(PaperBroker::new());
    let mut m = manager(broker.clone());
    broker.set_price(SYMBOL, dec!(20));
    m.submit_entry("NIFTY-1-17", &contract(), 75, OrderKind::Market)
        .await
        .unwrap();

    for _ in 0..3 {
        broker.inject_failure(PaperOperation::Status, BrokerError::transport("gateway down"));
    }
    let err = m.poll_status().await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::StatusUnknown { source: BrokerError::Exhausted { attempts: 3, .. }, .. }
    ));
    assert_eq!(m.position().unwrap().state, PositionState::EntrySubmitted);
    assert!(m
        .drain_events()
        .iter()
        .any(|e| matches!(e, LifecycleEvent::StatusUnknown { .. })));
}

#[tokio::test]
async fn fatal_rejection_frees_the_gate_for_the_next_signal() {
    let broker = Arc::new(PaperBroker::new());
    let mut m = manager(broker.clone());
    broker.inject_failure(PaperOperation::Place, BrokerError::InsufficientMargin("short".into()));

    let err = m
        .submit_entry("NIFTY-1-17", &contract(), 75, OrderKind::Market)
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::BrokerFatal(_)));
    assert_eq!(broker.place_calls(), 1);
    assert!(!m.is_position_active());

    m.submit_entry("NIFTY-30-44", &contract(), 75, OrderKind::Market)
        .await
        .unwrap();
    assert!(m.is_position_active());
}

#[tokio::test]
async fn rate_limited_gateway_passes_through() {
    let paper = Arc::new(PaperBroker::new());
    let limited: Arc<dyn BrokerGateway> =
        Arc::new(RateLimitedBroker::new(paper.clone(), &BrokerConfig::default()));
    let mut m = manager(limited);
    paper.set_price(SYMBOL, dec!(20));

    m.submit_entry("NIFTY-1-17", &contract(), 75, OrderKind::Market)
        .await
        .unwrap();
    assert_eq!(
        m.poll_status().await.unwrap(),
        PollOutcome::Transitioned(PositionState::EntryFilled)
    );
    assert_eq!(paper.orders().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn monitor_times_out_unfilled_entry() {
    let broker = Arc::new(PaperBroker::new());
    broker.set_price(SYMBOL, dec!(20));
    let (handle, task) = spawn_monitor(manager(broker.clone()), Duration::from_secs(2));

    let plan = TradePlan {
        correlation_id: "NIFTY-1-17".to_string(),
        contract: contract(),
        quantity: 75,
        entry: OrderKind::Limit { price: dec!(19) },
        levels: RiskLevels {
            underlying_entry: dec!(118.5),
            underlying_stop_distance: dec!(10.5),
            entry_price: dec!(20),
            stop_loss: dec!(14.75),
            target: dec!(30.50),
        },
    };
    handle.submit(plan).await.unwrap();
    assert!(handle.is_position_active());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(handle.is_position_active());

    tokio::time::sleep(Duration::from_secs(35)).await;
    assert!(!handle.is_position_active());
    let position = handle.snapshot().await.unwrap().unwrap();
    assert_eq!(position.state, PositionState::Closed);
    assert_eq!(broker.orders()[0].status, OrderStatus::Cancelled);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
}
