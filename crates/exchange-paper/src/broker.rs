//! Paper broker.
//!
//! Orders rest in an in-memory book and fill when the injected mark price
//! crosses them: market orders at the mark, sell-stops once the mark trades
//! at or below the trigger, sell-limits once it trades at or above the limit.
//! Failures can be queued per operation to exercise retry paths.
//! `PlaceAck` failures are raised after the order is booked, modelling a
//! reply lost on the way back from the exchange.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use swing_trade_core::error::BrokerError;
use swing_trade_core::orders::{OrderKind, OrderRecord, OrderSide, OrderSpec, OrderStatus};
use swing_trade_core::traits::BrokerGateway;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperOperation {
    Place,
    /// Books the order, then fails the reply.
    PlaceAck,
    Status,
    Cancel,
}

struct PaperOrder {
    kind: OrderKind,
    record: OrderRecord,
}

impl PaperOrder {
    /// Fill price if the order trades at `mark`.
    fn crosses(&self, mark: Decimal) -> Option<Decimal> {
        let side = self.record.side;
        let crossed = match (self.kind, side) {
            (OrderKind::Market, _) => true,
            (OrderKind::Limit { price }, OrderSide::Buy) => mark <= price,
            (OrderKind::Limit { price }, OrderSide::Sell) => mark >= price,
            (OrderKind::StopLoss { trigger }, OrderSide::Sell) => mark <= trigger,
            (OrderKind::StopLoss { trigger }, OrderSide::Buy) => mark >= trigger,
        };
        crossed.then_some(mark)
    }

    fn fill(&mut self, price: Decimal, quantity: u32) {
        self.record.filled_quantity = quantity.min(self.record.requested_quantity);
        self.record.filled_price = Some(price);
        self.record.status = if self.record.filled_quantity == self.record.requested_quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.record.updated_at = Utc::now();
    }
}

#[derive(Default)]
struct Book {
    next_id: u64,
    orders: HashMap<String, PaperOrder>,
    by_correlation: HashMap<String, String>,
    marks: HashMap<String, Decimal>,
    failures: HashMap<PaperOperation, VecDeque<BrokerError>>,
    place_calls: usize,
    cancel_calls: Vec<String>,
}

impl Book {
    fn take_failure(&mut self, op: PaperOperation) -> Option<BrokerError> {
        self.failures.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Fills every open order on `symbol` that the mark crosses.
    fn match_symbol(&mut self, symbol: &str) -> usize {
        let Some(mark) = self.marks.get(symbol).copied() else {
            return 0;
        };
        let mut fills = 0;
        for order in self.orders.values_mut() {
            if order.record.symbol != symbol || !order.record.is_open() {
                continue;
            }
            if let Some(price) = order.crosses(mark) {
                let quantity = order.record.requested_quantity;
                order.fill(price, quantity);
                fills += 1;
                info!(
                    order_id = %order.record.broker_order_id,
                    correlation_id = %order.record.correlation_id,
                    symbol,
                    price = %price,
                    quantity,
                    "Paper fill"
                );
            }
        }
        fills
    }
}

/// In-memory [`BrokerGateway`]. Clone-free; share it behind an `Arc`.
#[derive(Default)]
pub struct PaperBroker {
    book: Mutex<Book>,
}

impl PaperBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the option's mark price and fills whatever it crosses.
    /// Returns the number of orders filled.
    pub fn set_price(&self, symbol: &str, price: Decimal) -> usize {
        let mut book = self.book.lock();
        book.marks.insert(symbol.to_string(), price);
        book.match_symbol(symbol)
    }

    #[must_use]
    pub fn mark(&self, symbol: &str) -> Option<Decimal> {
        self.book.lock().marks.get(symbol).copied()
    }

    /// Queues `error` for the next call of `op`. Queued errors are returned
    /// in order, one per call.
    pub fn inject_failure(&self, op: PaperOperation, error: BrokerError) {
        self.book
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Fills part of an open order at the current mark. Returns `false` when
    /// the order is unknown, closed, or the symbol has no mark.
    pub fn fill_partially(&self, broker_order_id: &str, quantity: u32) -> bool {
        let mut book = self.book.lock();
        let Some(symbol) = book
            .orders
            .get(broker_order_id)
            .map(|o| o.record.symbol.clone())
        else {
            return false;
        };
        let Some(mark) = book.marks.get(&symbol).copied() else {
            return false;
        };
        match book.orders.get_mut(broker_order_id) {
            Some(order) if order.record.is_open() => {
                order.fill(mark, quantity);
                true
            }
            _ => false,
        }
    }

    #[must_use]
    pub fn order(&self, broker_order_id: &str) -> Option<OrderRecord> {
        self.book
            .lock()
            .orders
            .get(broker_order_id)
            .map(|o| o.record.clone())
    }

    /// All orders, oldest first.
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRecord> {
        let book = self.book.lock();
        let mut orders: Vec<OrderRecord> = book.orders.values().map(|o| o.record.clone()).collect();
        orders.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| order_number(&a.broker_order_id).cmp(&order_number(&b.broker_order_id)))
        });
        orders
    }

    #[must_use]
    pub fn place_calls(&self) -> usize {
        self.book.lock().place_calls
    }

    /// Order ids passed to `cancel_order`, in call order.
    #[must_use]
    pub fn cancel_calls(&self) -> Vec<String> {
        self.book.lock().cancel_calls.clone()
    }
}

fn order_number(id: &str) -> u64 {
    id.trim_start_matches("PAPER-").parse().unwrap_or(u64::MAX)
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn place_order(&self, spec: &OrderSpec) -> Result<String, BrokerError> {
        let mut book = self.book.lock();
        book.place_calls += 1;
        if let Some(err) = book.take_failure(PaperOperation::Place) {
            return Err(err);
        }
        if let Some(existing) = book.by_correlation.get(&spec.correlation_id).cloned() {
            debug!(
                correlation_id = %spec.correlation_id,
                order_id = %existing,
                "Duplicate correlation id, returning existing order"
            );
            return match book.take_failure(PaperOperation::PlaceAck) {
                Some(err) => Err(err),
                None => Ok(existing),
            };
        }
        if spec.quantity == 0 {
            return Err(BrokerError::rejected("quantity must be positive"));
        }

        book.next_id += 1;
        let id = format!("PAPER-{}", book.next_id);
        let record = OrderRecord::acknowledged(spec, id.clone(), Utc::now());
        book.orders.insert(
            id.clone(),
            PaperOrder {
                kind: spec.kind,
                record,
            },
        );
        book.by_correlation
            .insert(spec.correlation_id.clone(), id.clone());
        info!(
            order_id = %id,
            correlation_id = %spec.correlation_id,
            symbol = %spec.symbol,
            side = ?spec.side,
            kind = ?spec.kind,
            quantity = spec.quantity,
            "Paper order accepted"
        );
        book.match_symbol(&spec.symbol);
        match book.take_failure(PaperOperation::PlaceAck) {
            Some(err) => Err(err),
            None => Ok(id),
        }
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OrderRecord, BrokerError> {
        let mut book = self.book.lock();
        if let Some(err) = book.take_failure(PaperOperation::Status) {
            return Err(err);
        }
        book.orders
            .get(broker_order_id)
            .map(|o| o.record.clone())
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<bool, BrokerError> {
        let mut book = self.book.lock();
        book.cancel_calls.push(broker_order_id.to_string());
        if let Some(err) = book.take_failure(PaperOperation::Cancel) {
            return Err(err);
        }
        let order = book
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;
        if !order.record.is_open() {
            return Ok(false);
        }
        order.record.status = OrderStatus::Cancelled;
        order.record.updated_at = Utc::now();
        info!(order_id = %broker_order_id, "Paper order cancelled");
        Ok(true)
    }
}
