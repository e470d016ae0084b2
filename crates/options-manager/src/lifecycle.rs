//! Entry, protective orders and exit for the single active position.
//!
//! The manager is the only writer of position state. It is owned by one task
//! (see [`crate::monitor`]); other tasks observe it through the activity gate
//! and the cancel flag, never by mutating it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use swing_trade_core::config::LifecycleConfig;
use swing_trade_core::error::BrokerError;
use swing_trade_core::orders::{
    OptionContract, OrderKind, OrderRecord, OrderSide, OrderSpec, OrderStatus,
};
use swing_trade_core::retry::RetryPolicy;
use swing_trade_core::traits::{BrokerGateway, PersistenceSink};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::types::{
    CancelSummary, LifecycleEvent, PollOutcome, Position, PositionState, SubmitOutcome,
};

pub struct OrderLifecycleManager {
    broker: Arc<dyn BrokerGateway>,
    sink: Arc<dyn PersistenceSink>,
    retry: RetryPolicy,
    config: LifecycleConfig,
    position: Option<Position>,
    /// Entry correlation id -> broker order id, for idempotent submits.
    submitted: HashMap<String, String>,
    active_tx: watch::Sender<bool>,
    cancel_requested: Arc<AtomicBool>,
    events: Vec<LifecycleEvent>,
}

impl OrderLifecycleManager {
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerGateway>,
        sink: Arc<dyn PersistenceSink>,
        retry: RetryPolicy,
        config: LifecycleConfig,
    ) -> Self {
        let (active_tx, _) = watch::channel(false);
        Self {
            broker,
            sink,
            retry,
            config,
            position: None,
            submitted: HashMap::new(),
            active_tx,
            cancel_requested: Arc::new(AtomicBool::new(false)),
            events: Vec::new(),
        }
    }

    #[must_use]
    pub const fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    #[must_use]
    pub fn is_position_active(&self) -> bool {
        self.position.as_ref().is_some_and(Position::is_active)
    }

    /// Boolean gate: `true` while a position blocks new entries.
    #[must_use]
    pub fn subscribe_active(&self) -> watch::Receiver<bool> {
        self.active_tx.subscribe()
    }

    /// Flag raised by whoever requests a cancel, ahead of the cancel itself.
    /// Poll results that land while it is set are discarded.
    #[must_use]
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_requested)
    }

    /// Events produced since the last drain.
    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut self.events)
    }

    /// Sends the buy-to-open order.
    ///
    /// Idempotent by `correlation_id`: a repeated id returns the original
    /// broker order id without contacting the broker. Placement is
    /// asynchronous; fills are learned through [`Self::poll_status`].
    ///
    /// # Errors
    ///
    /// `PositionActive` if another position is live (nothing is sent),
    /// `BrokerFatal` if the broker refused the order (the position closes as
    /// rejected). Exhausted transient failures are not errors: the order may
    /// have landed, so the position is kept as [`SubmitOutcome::Unconfirmed`]
    /// and the next poll resends the same correlation id.
    pub async fn submit_entry(
        &mut self,
        correlation_id: &str,
        contract: &OptionContract,
        quantity: u32,
        kind: OrderKind,
    ) -> Result<SubmitOutcome, LifecycleError> {
        if let Some(broker_order_id) = self.submitted.get(correlation_id) {
            info!(correlation_id, broker_order_id, "Duplicate entry ignored");
            return Ok(SubmitOutcome::Duplicate {
                broker_order_id: broker_order_id.clone(),
            });
        }
        if let Some(active) = self.position.as_ref().filter(|p| p.is_active()) {
            if active.correlation_id == correlation_id && active.pending_entry.is_some() {
                info!(correlation_id, "Entry still unconfirmed");
                return Ok(SubmitOutcome::Unconfirmed {
                    correlation_id: correlation_id.to_string(),
                });
            }
            warn!(
                correlation_id,
                active = %active.correlation_id,
                "Entry refused, position already active"
            );
            return Err(LifecycleError::PositionActive {
                correlation_id: active.correlation_id.clone(),
            });
        }

        let spec = OrderSpec {
            correlation_id: correlation_id.to_string(),
            symbol: contract.symbol.clone(),
            side: OrderSide::Buy,
            quantity,
            kind,
        };
        self.position = Some(Position {
            correlation_id: correlation_id.to_string(),
            contract: contract.clone(),
            quantity,
            state: PositionState::Created,
            entry_order: None,
            stop_order: None,
            target_order: None,
            stop_price: None,
            target_price: None,
            opened_at: Utc::now(),
            entry_deadline: Instant::now() + Duration::from_secs(self.config.entry_timeout_secs),
            sibling_cancelled: false,
            pending_entry: None,
        });
        self.publish_gate();

        let placed = self.place(&spec).await;
        match placed {
            Ok(broker_order_id) => {
                let record = OrderRecord::acknowledged(&spec, broker_order_id.clone(), Utc::now());
                self.record(&record);
                self.submitted
                    .insert(correlation_id.to_string(), broker_order_id.clone());
                if let Some(position) = self.position.as_mut() {
                    position.entry_order = Some(record);
                }
                self.transition(PositionState::EntrySubmitted)?;
                info!(
                    correlation_id,
                    broker_order_id,
                    symbol = %contract.symbol,
                    quantity,
                    "Entry submitted"
                );
                Ok(SubmitOutcome::Submitted { broker_order_id })
            }
            Err(e) if e.is_fatal() => {
                error!(correlation_id, error = %e, "Entry rejected by broker");
                self.transition(PositionState::EntryRejected)?;
                self.transition(PositionState::Closed)?;
                Err(LifecycleError::BrokerFatal(e))
            }
            Err(e) => {
                error!(
                    correlation_id,
                    error = %e,
                    "Entry placement unconfirmed, reconciling on next poll"
                );
                self.events.push(LifecycleEvent::StatusUnknown {
                    correlation_id: correlation_id.to_string(),
                    message: e.to_string(),
                });
                if let Some(position) = self.position.as_mut() {
                    position.pending_entry = Some(spec);
                }
                self.transition(PositionState::EntrySubmitted)?;
                Ok(SubmitOutcome::Unconfirmed {
                    correlation_id: correlation_id.to_string(),
                })
            }
        }
    }

    /// Polls every open order of the position once and advances its state.
    ///
    /// # Errors
    ///
    /// `StatusUnknown` when a status query, or the resend of an unconfirmed
    /// entry, fails after retries. Nothing is assumed from a failed poll: the
    /// position keeps its last known state.
    pub async fn poll_status(&mut self) -> Result<PollOutcome, LifecycleError> {
        let Some(position) = self.position.as_ref().filter(|p| p.is_active()) else {
            return Ok(PollOutcome::Idle);
        };
        let before = position.state;
        if let Some(spec) = position.pending_entry.clone() {
            self.reconcile_entry(&spec).await?;
        }
        let Some(position) = self.position.as_ref().filter(|p| p.is_active()) else {
            return Ok(PollOutcome::Transitioned(PositionState::Closed));
        };
        let correlation_id = position.correlation_id.clone();
        let order_ids: Vec<String> = position
            .open_orders()
            .map(|o| o.broker_order_id.clone())
            .collect();
        if order_ids.is_empty() {
            return Ok(PollOutcome::Unchanged);
        }

        let mut reports = Vec::with_capacity(order_ids.len());
        for order_id in order_ids {
            match self.status(&order_id).await {
                Ok(report) => reports.push(report),
                Err(source) => {
                    error!(
                        correlation_id = %correlation_id,
                        order_id = %order_id,
                        error = %source,
                        "Order status unknown"
                    );
                    self.events.push(LifecycleEvent::StatusUnknown {
                        correlation_id,
                        message: source.to_string(),
                    });
                    return Err(LifecycleError::StatusUnknown { order_id, source });
                }
            }
        }

        if self.cancel_requested.load(Ordering::SeqCst) {
            debug!(correlation_id = %correlation_id, "Cancel pending, poll results dropped");
            return Ok(PollOutcome::Suppressed);
        }

        for report in &reports {
            self.apply_report(report);
        }

        match before {
            PositionState::EntrySubmitted => self.advance_entry().await?,
            PositionState::Monitoring => self.advance_protective().await?,
            _ => {}
        }

        let after = self.position.as_ref().map_or(before, |p| p.state);
        Ok(if after == before {
            PollOutcome::Unchanged
        } else {
            PollOutcome::Transitioned(after)
        })
    }

    /// Places the stop-loss and target as an emulated one-cancels-other pair.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the entry is filled. A failed placement
    /// cancels whatever was placed and exits the position manually.
    pub async fn place_protective_orders(
        &mut self,
        stop: Decimal,
        target: Decimal,
    ) -> Result<(), LifecycleError> {
        let position = self.position.as_ref().ok_or(LifecycleError::NoPosition)?;
        if position.state != PositionState::EntryFilled {
            return Err(LifecycleError::InvalidTransition {
                state: position.state,
                operation: "place_protective_orders",
            });
        }

        let leg = |suffix: &str, kind: OrderKind| OrderSpec {
            correlation_id: format!("{}-{suffix}", position.correlation_id),
            symbol: position.contract.symbol.clone(),
            side: OrderSide::Sell,
            quantity: position.quantity,
            kind,
        };
        let stop_spec = leg("SL", OrderKind::StopLoss { trigger: stop });
        let target_spec = leg("TP", OrderKind::Limit { price: target });

        let stop_id = match self.place(&stop_spec).await {
            Ok(id) => id,
            Err(e) => return Err(self.protection_failed("stop_loss", e).await),
        };
        let stop_record = OrderRecord::acknowledged(&stop_spec, stop_id, Utc::now());
        self.record(&stop_record);
        if let Some(position) = self.position.as_mut() {
            position.stop_order = Some(stop_record);
            position.stop_price = Some(stop);
        }

        let target_id = match self.place(&target_spec).await {
            Ok(id) => id,
            Err(e) => return Err(self.protection_failed("target", e).await),
        };
        let target_record = OrderRecord::acknowledged(&target_spec, target_id, Utc::now());
        self.record(&target_record);
        if let Some(position) = self.position.as_mut() {
            position.target_order = Some(target_record);
            position.target_price = Some(target);
        }

        info!(stop = %stop, target = %target, "Protective orders placed");
        self.transition(PositionState::ProtectiveOrdersPlaced)?;
        self.transition(PositionState::Monitoring)
    }

    /// Best-effort cancel of every open order, then a manual exit.
    /// Individual cancel failures are logged, not returned.
    ///
    /// # Errors
    ///
    /// `NoPosition` / `InvalidTransition` when there is nothing live to cancel.
    pub async fn cancel_all(&mut self) -> Result<CancelSummary, LifecycleError> {
        self.cancel_requested.store(true, Ordering::SeqCst);
        let result = self.cancel_open_orders().await;
        self.cancel_requested.store(false, Ordering::SeqCst);
        result
    }

    async fn cancel_open_orders(&mut self) -> Result<CancelSummary, LifecycleError> {
        let position = self.position.as_ref().ok_or(LifecycleError::NoPosition)?;
        if !position.is_active() {
            return Err(LifecycleError::InvalidTransition {
                state: position.state,
                operation: "cancel_all",
            });
        }
        let order_ids: Vec<String> = position
            .open_orders()
            .map(|o| o.broker_order_id.clone())
            .collect();

        let mut summary = CancelSummary::default();
        if position.pending_entry.is_some() {
            summary.attempted += 1;
            summary.failed += 1;
            error!(
                correlation_id = %position.correlation_id,
                "Entry placement unconfirmed, check the broker for this correlation id"
            );
        }
        for order_id in order_ids {
            summary.attempted += 1;
            match self.cancel(&order_id).await {
                Ok(true) => {
                    summary.cancelled += 1;
                    self.mark_cancelled(&order_id);
                }
                Ok(false) => {
                    summary.failed += 1;
                    warn!(order_id = %order_id, "Broker declined cancel");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!(order_id = %order_id, error = %e, "Cancel failed");
                }
            }
        }

        info!(
            attempted = summary.attempted,
            cancelled = summary.cancelled,
            failed = summary.failed,
            "Position cancelled"
        );
        self.transition(PositionState::ExitedManually)?;
        self.transition(PositionState::Closed)?;
        Ok(summary)
    }

    /// Resends an entry whose placement reply was lost. The broker dedups by
    /// correlation id, so this returns the original order if it landed.
    async fn reconcile_entry(&mut self, spec: &OrderSpec) -> Result<(), LifecycleError> {
        match self.place(spec).await {
            Ok(broker_order_id) => {
                info!(
                    correlation_id = %spec.correlation_id,
                    broker_order_id = %broker_order_id,
                    "Entry placement confirmed"
                );
                let record = OrderRecord::acknowledged(spec, broker_order_id.clone(), Utc::now());
                self.record(&record);
                self.submitted
                    .insert(spec.correlation_id.clone(), broker_order_id);
                if let Some(position) = self.position.as_mut() {
                    position.entry_order = Some(record);
                    position.pending_entry = None;
                }
                Ok(())
            }
            Err(e) if e.is_fatal() => {
                error!(correlation_id = %spec.correlation_id, error = %e, "Entry rejected by broker");
                if let Some(position) = self.position.as_mut() {
                    position.pending_entry = None;
                }
                self.transition(PositionState::EntryRejected)?;
                self.transition(PositionState::Closed)
            }
            Err(source) => {
                error!(
                    correlation_id = %spec.correlation_id,
                    error = %source,
                    "Entry placement still unconfirmed"
                );
                self.events.push(LifecycleEvent::StatusUnknown {
                    correlation_id: spec.correlation_id.clone(),
                    message: source.to_string(),
                });
                Err(LifecycleError::StatusUnknown {
                    order_id: spec.correlation_id.clone(),
                    source,
                })
            }
        }
    }

    async fn advance_entry(&mut self) -> Result<(), LifecycleError> {
        let Some(position) = self.position.as_ref() else {
            return Ok(());
        };
        let Some(entry) = position.entry_order.as_ref() else {
            return Ok(());
        };
        let status = entry.status;
        let filled = entry.filled_quantity;
        let order_id = entry.broker_order_id.clone();
        let timed_out = Instant::now() >= position.entry_deadline;

        match status {
            OrderStatus::Filled => self.entry_filled(filled),
            OrderStatus::Rejected | OrderStatus::Cancelled | OrderStatus::Expired => {
                if filled > 0 {
                    self.entry_filled(filled)
                } else {
                    warn!(order_id = %order_id, %status, "Entry not filled");
                    self.transition(PositionState::EntryRejected)?;
                    self.transition(PositionState::Closed)
                }
            }
            OrderStatus::Pending | OrderStatus::Placed | OrderStatus::PartiallyFilled
                if timed_out =>
            {
                self.expire_entry(&order_id, filled).await
            }
            _ => Ok(()),
        }
    }

    fn entry_filled(&mut self, filled: u32) -> Result<(), LifecycleError> {
        if let Some(position) = self.position.as_mut() {
            if filled > 0 {
                position.quantity = filled;
            }
            info!(
                correlation_id = %position.correlation_id,
                quantity = position.quantity,
                "Entry filled"
            );
        }
        self.transition(PositionState::EntryFilled)
    }

    /// Entry timeout: cancel the remainder and keep whatever filled.
    async fn expire_entry(&mut self, order_id: &str, filled: u32) -> Result<(), LifecycleError> {
        warn!(
            order_id,
            filled,
            timeout_secs = self.config.entry_timeout_secs,
            "Entry timed out, cancelling"
        );
        match self.cancel(order_id).await {
            Ok(true) => {
                self.mark_cancelled(order_id);
                if filled > 0 {
                    self.entry_filled(filled)
                } else {
                    self.transition(PositionState::EntryRejected)?;
                    self.transition(PositionState::Closed)
                }
            }
            Ok(false) => {
                info!(order_id, "Entry cancel declined, awaiting next status");
                Ok(())
            }
            Err(e) => {
                error!(order_id, error = %e, "Entry cancel failed");
                Err(LifecycleError::from_broker(e))
            }
        }
    }

    /// Emulated OCO: the first protective leg to finish decides the exit and
    /// the surviving leg is cancelled once. The position stays in
    /// `Monitoring` until that leg is confirmed gone, so a failed cancel is
    /// retried by the next poll.
    async fn advance_protective(&mut self) -> Result<(), LifecycleError> {
        let Some(position) = self.position.as_ref() else {
            return Ok(());
        };
        let (Some(stop), Some(target)) = (&position.stop_order, &position.target_order) else {
            return Ok(());
        };

        let open_id = |o: &OrderRecord| o.is_open().then(|| o.broker_order_id.clone());
        let (exit, sibling) = if stop.status == OrderStatus::Filled {
            (PositionState::ExitedByStop, open_id(target))
        } else if target.status == OrderStatus::Filled {
            (PositionState::ExitedByTarget, open_id(stop))
        } else if stop.status.is_terminal() || target.status.is_terminal() {
            warn!(
                stop = %stop.status,
                target = %target.status,
                "Protective leg ended without a fill, exiting"
            );
            (
                PositionState::ExitedManually,
                open_id(stop).or_else(|| open_id(target)),
            )
        } else {
            return Ok(());
        };
        let already_cancelled = position.sibling_cancelled;

        if let Some(sibling_id) = sibling.filter(|_| !already_cancelled) {
            if !self.settle_sibling(&sibling_id).await? {
                return Ok(());
            }
            if let Some(position) = self.position.as_mut() {
                position.sibling_cancelled = true;
            }
        }

        self.transition(exit)?;
        self.transition(PositionState::Closed)
    }

    /// Cancels the surviving protective leg. `Ok(true)` once the broker no
    /// longer holds it open, `Ok(false)` while it is still working.
    ///
    /// # Errors
    ///
    /// `StatusUnknown` when the cancel or the follow-up status read fails
    /// after retries.
    async fn settle_sibling(&mut self, sibling_id: &str) -> Result<bool, LifecycleError> {
        match self.cancel(sibling_id).await {
            Ok(true) => {
                self.mark_cancelled(sibling_id);
                return Ok(true);
            }
            Ok(false) => {}
            Err(source) => return Err(self.sibling_unknown(sibling_id, source)),
        }

        // declined: only a terminal status lets the position close
        let report = match self.status(sibling_id).await {
            Ok(report) => report,
            Err(source) => return Err(self.sibling_unknown(sibling_id, source)),
        };
        self.apply_report(&report);
        if report.status == OrderStatus::Filled {
            error!(order_id = %sibling_id, "Both protective legs filled");
        }
        if report.status.is_terminal() {
            return Ok(true);
        }
        warn!(
            order_id = %sibling_id,
            status = %report.status,
            "Sibling cancel declined, leg still open"
        );
        Ok(false)
    }

    fn sibling_unknown(&mut self, sibling_id: &str, source: BrokerError) -> LifecycleError {
        let correlation_id = self
            .position
            .as_ref()
            .map(|p| p.correlation_id.clone())
            .unwrap_or_default();
        error!(
            correlation_id = %correlation_id,
            order_id = %sibling_id,
            error = %source,
            "Sibling cancel failed, leg may still be live"
        );
        self.events.push(LifecycleEvent::StatusUnknown {
            correlation_id,
            message: source.to_string(),
        });
        LifecycleError::StatusUnknown {
            order_id: sibling_id.to_string(),
            source,
        }
    }

    /// A protective leg could not be placed: pull the other one and exit.
    async fn protection_failed(&mut self, leg: &str, e: BrokerError) -> LifecycleError {
        error!(leg, error = %e, "Protective order placement failed, position unprotected");
        if let Err(cancel_err) = self.cancel_all().await {
            error!(error = %cancel_err, "Manual exit after protection failure failed");
        }
        LifecycleError::from_broker(e)
    }

    fn apply_report(&mut self, report: &OrderRecord) {
        let Some(position) = self.position.as_mut() else {
            return;
        };
        let orders = [
            &mut position.entry_order,
            &mut position.stop_order,
            &mut position.target_order,
        ];
        for order in orders.into_iter().flatten() {
            if order.broker_order_id != report.broker_order_id {
                continue;
            }
            if order.apply(report) {
                debug!(
                    order_id = %order.broker_order_id,
                    status = %order.status,
                    filled = order.filled_quantity,
                    "Order status advanced"
                );
                self.sink.record_order(order);
                self.events.push(LifecycleEvent::OrderUpdated(order.clone()));
            } else if report.status != order.status {
                debug!(
                    order_id = %order.broker_order_id,
                    local = %order.status,
                    reported = %report.status,
                    "Stale status report ignored"
                );
            }
        }
    }

    fn mark_cancelled(&mut self, order_id: &str) {
        let Some(position) = self.position.as_mut() else {
            return;
        };
        let orders = [
            &mut position.entry_order,
            &mut position.stop_order,
            &mut position.target_order,
        ];
        for order in orders.into_iter().flatten() {
            if order.broker_order_id == order_id && order.is_open() {
                order.status = OrderStatus::Cancelled;
                order.updated_at = Utc::now();
                self.sink.record_order(order);
                self.events.push(LifecycleEvent::OrderUpdated(order.clone()));
            }
        }
    }

    fn record(&mut self, record: &OrderRecord) {
        self.sink.record_order(record);
        self.events.push(LifecycleEvent::OrderUpdated(record.clone()));
    }

    fn transition(&mut self, next: PositionState) -> Result<(), LifecycleError> {
        let position = self.position.as_mut().ok_or(LifecycleError::NoPosition)?;
        let from = position.state;
        if !from.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                state: from,
                operation: "transition",
            });
        }
        position.state = next;
        info!(
            correlation_id = %position.correlation_id,
            from = %from,
            to = %next,
            "Position state changed"
        );
        self.events.push(LifecycleEvent::StateChanged {
            correlation_id: position.correlation_id.clone(),
            from,
            to: next,
        });
        self.publish_gate();
        Ok(())
    }

    fn publish_gate(&self) {
        let active = self.is_position_active();
        self.active_tx.send_if_modified(|current| {
            if *current == active {
                false
            } else {
                *current = active;
                true
            }
        });
    }

    async fn place(&self, spec: &OrderSpec) -> Result<String, BrokerError> {
        let broker = &self.broker;
        self.retry.run("place_order", || broker.place_order(spec)).await
    }

    async fn status(&self, order_id: &str) -> Result<OrderRecord, BrokerError> {
        let broker = &self.broker;
        self.retry
            .run("get_order_status", || broker.get_order_status(order_id))
            .await
    }

    async fn cancel(&self, order_id: &str) -> Result<bool, BrokerError> {
        let broker = &self.broker;
        self.retry
            .run("cancel_order", || broker.cancel_order(order_id))
            .await
    }
}
