//! Background owner of the lifecycle manager.
//!
//! One task holds the [`OrderLifecycleManager`] and is the only place position
//! state changes. Everyone else talks to it through a cloneable
//! [`PositionHandle`]: commands go in over an mpsc channel, results come back
//! on oneshot replies, and lifecycle events fan out on a broadcast channel.
//! Status polling runs on its own timer, independent of bar arrival.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::lifecycle::OrderLifecycleManager;
use crate::types::{
    CancelSummary, LifecycleEvent, PollOutcome, Position, PositionState, RiskLevels,
    SubmitOutcome, TradePlan,
};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, LifecycleError>>;

#[derive(Debug)]
pub enum MonitorCommand {
    Submit {
        plan: Box<TradePlan>,
        reply: Reply<SubmitOutcome>,
    },
    CancelAll {
        reply: Reply<CancelSummary>,
    },
    Snapshot {
        reply: oneshot::Sender<Option<Position>>,
    },
    /// Poll immediately instead of waiting for the next tick.
    PollNow {
        reply: Reply<PollOutcome>,
    },
    Shutdown,
}

pub struct PositionMonitor {
    manager: OrderLifecycleManager,
    rx: mpsc::Receiver<MonitorCommand>,
    event_tx: broadcast::Sender<LifecycleEvent>,
    poll_interval: Duration,
    /// Exit levels of the live plan, applied once the entry fills.
    levels: Option<RiskLevels>,
}

impl PositionMonitor {
    /// Runs until `Shutdown` or until every handle is dropped.
    pub async fn run(mut self) {
        info!(poll_ms = self.poll_interval.as_millis(), "Position monitor started");
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                cmd = self.rx.recv() => match cmd {
                    Some(MonitorCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle(cmd).await,
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.poll().await {
                        error!(error = %e, "Status poll failed");
                    }
                }
            }
            self.publish_events();
        }

        if self.manager.is_position_active() {
            warn!("Position monitor stopping with an active position");
        }
        info!("Position monitor stopped");
    }

    async fn handle(&mut self, cmd: MonitorCommand) {
        match cmd {
            MonitorCommand::Submit { plan, reply } => {
                let result = self.submit(*plan).await;
                let _ = reply.send(result);
            }
            MonitorCommand::CancelAll { reply } => {
                let result = self.manager.cancel_all().await;
                if result.is_ok() {
                    self.levels = None;
                }
                let _ = reply.send(result);
            }
            MonitorCommand::Snapshot { reply } => {
                let _ = reply.send(self.manager.position().cloned());
            }
            MonitorCommand::PollNow { reply } => {
                let result = self.poll().await;
                let _ = reply.send(result);
            }
            MonitorCommand::Shutdown => {}
        }
    }

    async fn submit(&mut self, plan: TradePlan) -> Result<SubmitOutcome, LifecycleError> {
        let outcome = self
            .manager
            .submit_entry(&plan.correlation_id, &plan.contract, plan.quantity, plan.entry)
            .await?;
        if matches!(
            outcome,
            SubmitOutcome::Submitted { .. } | SubmitOutcome::Unconfirmed { .. }
        ) {
            self.levels = Some(plan.levels);
        }
        Ok(outcome)
    }

    /// One status poll, followed by protective order placement if the entry
    /// has just filled.
    async fn poll(&mut self) -> Result<PollOutcome, LifecycleError> {
        let outcome = self.manager.poll_status().await?;
        if outcome != PollOutcome::Idle {
            debug!(?outcome, "Status polled");
        }

        let state = self.manager.position().map(|p| p.state);
        match state {
            Some(PositionState::EntryFilled) => {
                let Some(levels) = self.levels else {
                    error!("Entry filled without exit levels, exiting");
                    self.manager.cancel_all().await?;
                    return Ok(PollOutcome::Transitioned(PositionState::Closed));
                };
                self.manager
                    .place_protective_orders(levels.stop_loss, levels.target)
                    .await?;
                Ok(PollOutcome::Transitioned(PositionState::Monitoring))
            }
            Some(s) if !s.is_active() => {
                self.levels = None;
                Ok(outcome)
            }
            _ => Ok(outcome),
        }
    }

    fn publish_events(&mut self) {
        for event in self.manager.drain_events() {
            // No receivers is fine
            let _ = self.event_tx.send(event);
        }
    }
}

/// Cloneable access to the position monitor task.
#[derive(Clone)]
pub struct PositionHandle {
    tx: mpsc::Sender<MonitorCommand>,
    cancel_flag: Arc<AtomicBool>,
    active: watch::Receiver<bool>,
    event_tx: broadcast::Sender<LifecycleEvent>,
}

impl PositionHandle {
    /// Non-blocking gate read: `true` while a position blocks new entries.
    #[must_use]
    pub fn is_position_active(&self) -> bool {
        *self.active.borrow()
    }

    #[must_use]
    pub fn watch_active(&self) -> watch::Receiver<bool> {
        self.active.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.event_tx.subscribe()
    }

    /// Sends a trade plan for entry.
    ///
    /// # Errors
    /// Whatever [`OrderLifecycleManager::submit_entry`] returns, or
    /// `MonitorClosed` if the monitor task is gone.
    pub async fn submit(&self, plan: TradePlan) -> Result<SubmitOutcome, LifecycleError> {
        let (reply, rx) = oneshot::channel();
        self.send(MonitorCommand::Submit {
            plan: Box::new(plan),
            reply,
        })
        .await?;
        rx.await.map_err(|_| LifecycleError::MonitorClosed)?
    }

    /// Cancels everything for the live position.
    ///
    /// The cancel flag is raised before the command is queued so a poll
    /// already in flight drops its results instead of reopening orders.
    ///
    /// # Errors
    /// `NoPosition` / `InvalidTransition` from the manager, or
    /// `MonitorClosed`.
    pub async fn cancel_all(&self) -> Result<CancelSummary, LifecycleError> {
        self.cancel_flag.store(true, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        if let Err(e) = self.send(MonitorCommand::CancelAll { reply }).await {
            self.cancel_flag.store(false, Ordering::SeqCst);
            return Err(e);
        }
        rx.await.map_err(|_| LifecycleError::MonitorClosed)?
    }

    /// Copy of the current position, if any.
    ///
    /// # Errors
    /// `MonitorClosed` if the monitor task is gone.
    pub async fn snapshot(&self) -> Result<Option<Position>, LifecycleError> {
        let (reply, rx) = oneshot::channel();
        self.send(MonitorCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| LifecycleError::MonitorClosed)
    }

    /// Forces a status poll now.
    ///
    /// # Errors
    /// `StatusUnknown` when the broker cannot be reached, or `MonitorClosed`.
    pub async fn poll_now(&self) -> Result<PollOutcome, LifecycleError> {
        let (reply, rx) = oneshot::channel();
        self.send(MonitorCommand::PollNow { reply }).await?;
        rx.await.map_err(|_| LifecycleError::MonitorClosed)?
    }

    /// Stops the monitor task. Open broker orders are left as they are.
    ///
    /// # Errors
    /// `MonitorClosed` if the task already stopped.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        self.send(MonitorCommand::Shutdown).await
    }

    async fn send(&self, cmd: MonitorCommand) -> Result<(), LifecycleError> {
        self.tx
            .send(cmd)
            .await
            .map_err(|_| LifecycleError::MonitorClosed)
    }
}

/// Moves the manager onto its own task and returns a handle to it.
#[must_use]
pub fn spawn(
    manager: OrderLifecycleManager,
    poll_interval: Duration,
) -> (PositionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let handle = PositionHandle {
        tx,
        cancel_flag: manager.cancel_flag(),
        active: manager.subscribe_active(),
        event_tx: event_tx.clone(),
    };
    let monitor = PositionMonitor {
        manager,
        rx,
        event_tx,
        poll_interval: poll_interval.max(Duration::from_millis(1)),
        levels: None,
    };
    let task = tokio::spawn(monitor.run());
    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use swing_trade_core::config::LifecycleConfig;
    use swing_trade_core::error::BrokerError;
    use swing_trade_core::orders::{
        OptionContract, OptionType, OrderKind, OrderRecord, OrderSpec, OrderStatus,
    };
    use swing_trade_core::retry::RetryPolicy;
    use swing_trade_core::traits::{BrokerGateway, TracingSink};

    /// Fills every market order on the first status query.
    #[derive(Default)]
    struct InstantFillBroker {
        orders: Mutex<HashMap<String, OrderRecord>>,
        cancels: Mutex<Vec<String>>,
        /// Placements whose reply is dropped after the order is booked.
        lost_acks: Mutex<u32>,
    }

    #[async_trait]
    impl BrokerGateway for InstantFillBroker {
        async fn place_order(&self, spec: &OrderSpec) -> Result<String, BrokerError> {
            let mut orders = self.orders.lock().unwrap();
            let existing = orders
                .values()
                .find(|o| o.correlation_id == spec.correlation_id)
                .map(|o| o.broker_order_id.clone());
            let id = existing.unwrap_or_else(|| {
                let id = format!("P{}", orders.len() + 1);
                orders.insert(id.clone(), OrderRecord::acknowledged(spec, id.clone(), Utc::now()));
                id
            });
            let mut lost = self.lost_acks.lock().unwrap();
            if *lost > 0 {
                *lost -= 1;
                return Err(BrokerError::transport("reply lost"));
            }
            Ok(id)
        }

        async fn get_order_status(&self, id: &str) -> Result<OrderRecord, BrokerError> {
            let mut orders = self.orders.lock().unwrap();
            let order = orders
                .get_mut(id)
                .ok_or_else(|| BrokerError::UnknownOrder(id.to_string()))?;
            // Only the entry is a market order; protective legs carry a price
            if order.requested_price.is_none() && order.status == OrderStatus::Placed {
                order.status = OrderStatus::Filled;
                order.filled_quantity = order.requested_quantity;
                order.filled_price = Some(dec!(20));
            }
            Ok(order.clone())
        }

        async fn cancel_order(&self, id: &str) -> Result<bool, BrokerError> {
            self.cancels.lock().unwrap().push(id.to_string());
            let mut orders = self.orders.lock().unwrap();
            let order = orders
                .get_mut(id)
                .ok_or_else(|| BrokerError::UnknownOrder(id.to_string()))?;
            if order.status.is_terminal() {
                return Ok(false);
            }
            order.status = OrderStatus::Cancelled;
            Ok(true)
        }
    }

    fn plan() -> TradePlan {
        let contract = OptionContract {
            symbol: "NIFTY2510923600CE".to_string(),
            strike: dec!(23600),
            expiry: NaiveDate::from_ymd_opt(2025, 1, 9).unwrap(),
            option_type: OptionType::Call,
            last_price: dec!(20),
            delta: 0.5,
            gamma: 0.002,
            theta: -6.0,
            vega: 8.0,
            implied_volatility: 15.0,
            open_interest: 100_000,
            bid: dec!(19.9),
            ask: dec!(20.1),
        };
        TradePlan {
            correlation_id: "NIFTY-1-17".to_string(),
            contract,
            quantity: 75,
            entry: OrderKind::Market,
            levels: RiskLevels {
                underlying_entry: dec!(118.5),
                underlying_stop_distance: dec!(10.5),
                entry_price: dec!(20),
                stop_loss: dec!(14.75),
                target: dec!(30.50),
            },
        }
    }

    fn start(broker: Arc<InstantFillBroker>) -> (PositionHandle, JoinHandle<()>) {
        let manager = OrderLifecycleManager::new(
            broker,
            Arc::new(TracingSink),
            RetryPolicy::none(),
            LifecycleConfig::default(),
        );
        // Long interval so only explicit polls run during the test
        spawn(manager, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn fill_places_protective_orders() {
        let broker = Arc::new(InstantFillBroker::default());
        let (handle, task) = start(broker.clone());

        let outcome = handle.submit(plan()).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Submitted { broker_order_id: "P1".into() });
        assert!(handle.is_position_active());

        assert_eq!(
            handle.poll_now().await.unwrap(),
            PollOutcome::Transitioned(PositionState::Monitoring)
        );
        let position = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(position.state, PositionState::Monitoring);
        assert_eq!(position.stop_price, Some(dec!(14.75)));
        assert_eq!(position.target_price, Some(dec!(30.50)));
        assert_eq!(broker.orders.lock().unwrap().len(), 3);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unconfirmed_entry_still_gets_protected() {
        let broker = Arc::new(InstantFillBroker::default());
        *broker.lost_acks.lock().unwrap() = 1;
        let (handle, task) = start(broker.clone());

        let outcome = handle.submit(plan()).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Unconfirmed { correlation_id: "NIFTY-1-17".into() });
        assert!(handle.is_position_active());

        assert_eq!(
            handle.poll_now().await.unwrap(),
            PollOutcome::Transitioned(PositionState::Monitoring)
        );
        let position = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(position.entry_order.unwrap().broker_order_id, "P1");
        assert_eq!(position.stop_price, Some(dec!(14.75)));
        assert_eq!(broker.orders.lock().unwrap().len(), 3);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn cancel_all_clears_the_gate_and_flag() {
        let broker = Arc::new(InstantFillBroker::default());
        let (handle, task) = start(broker.clone());
        let mut events = handle.subscribe();

        handle.submit(plan()).await.unwrap();
        handle.poll_now().await.unwrap();
        let summary = handle.cancel_all().await.unwrap();

        assert_eq!(summary.cancelled, 2);
        assert!(!handle.is_position_active());
        assert!(!handle.cancel_flag.load(Ordering::SeqCst));

        let mut saw_manual_exit = false;
        while let Ok(event) = events.try_recv() {
            if matches!(
                event,
                LifecycleEvent::StateChanged { to: PositionState::ExitedManually, .. }
            ) {
                saw_manual_exit = true;
            }
        }
        assert!(saw_manual_exit);

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn closed_monitor_reports_monitor_closed() {
        let broker = Arc::new(InstantFillBroker::default());
        let (handle, task) = start(broker);
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert_eq!(handle.snapshot().await.unwrap_err(), LifecycleError::MonitorClosed);
        assert_eq!(handle.cancel_all().await.unwrap_err(), LifecycleError::MonitorClosed);
        assert!(!handle.cancel_flag.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_polls_without_commands() {
        let broker = Arc::new(InstantFillBroker::default());
        let manager = OrderLifecycleManager::new(
            broker.clone(),
            Arc::new(TracingSink),
            RetryPolicy::none(),
            LifecycleConfig::default(),
        );
        let (handle, task) = spawn(manager, Duration::from_secs(2));
        let mut active = handle.watch_active();

        handle.submit(plan()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let position = handle.snapshot().await.unwrap().unwrap();
        assert_eq!(position.state, PositionState::Monitoring);
        assert!(*active.borrow_and_update());

        handle.shutdown().await.unwrap();
        task.await.unwrap();
    }
}
