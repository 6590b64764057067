//! PaperExchange — in-process exchange simulator for replay and tests.
//!
//! Candles are revealed one at a time with `advance`. Resting orders are
//! matched against each revealed candle:
//! - stop-market orders fill at the trigger, or at the open when the candle
//!   gaps through it
//! - limit orders fill at the limit price, or at the open when it is better
//! - within one candle stops are processed before limits (worst case)
//!
//! Market orders and marketable limits fill immediately at the mark.
//! Reduce-only orders never flip a position; once a position is flat the
//! remaining reduce-only orders on it are cancelled.
//!
//! Faults can be scripted per operation to exercise retry paths, including a
//! lost acknowledgment where the order is accepted but the call reports an
//! error.

use super::{Exchange, ExchangeError};
use crate::domain::{
    Candle, Direction, Instrument, LinkId, Order, OrderId, OrderKind, OrderRequest, OrderState,
    Position, Side,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Exchange operation a fault can be scripted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Candles,
    MarkPrice,
    Place,
    Cancel,
    Amend,
    Status,
    LinkLookup,
    Position,
}

/// A scripted failure, consumed by the next call of its operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// The call fails without side effects.
    Error(ExchangeError),
    /// The call takes effect but the caller sees the error.
    LostAck(ExchangeError),
}

#[derive(Debug)]
struct Market {
    instrument: Instrument,
    candles: Vec<Candle>,
    /// Number of candles revealed so far.
    revealed: usize,
    interval: Duration,
    mark: f64,
}

#[derive(Debug)]
struct PaperState {
    markets: HashMap<String, Market>,
    orders: BTreeMap<u64, Order>,
    by_link: HashMap<LinkId, u64>,
    positions: HashMap<(String, Direction), Position>,
    faults: HashMap<FaultOp, VecDeque<Fault>>,
    calls: HashMap<FaultOp, usize>,
    next_id: u64,
    clock: DateTime<Utc>,
}

/// In-memory exchange. All methods take `&self`; state sits behind one mutex.
#[derive(Debug)]
pub struct PaperExchange {
    state: Mutex<PaperState>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState {
                markets: HashMap::new(),
                orders: BTreeMap::new(),
                by_link: HashMap::new(),
                positions: HashMap::new(),
                faults: HashMap::new(),
                calls: HashMap::new(),
                next_id: 1,
                clock: DateTime::<Utc>::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a symbol with its full candle history (nothing revealed yet).
    pub fn add_market(&self, instrument: Instrument, candles: Vec<Candle>) {
        let interval = match candles.as_slice() {
            [a, b, ..] => b.start_time - a.start_time,
            _ => Duration::minutes(1),
        };
        let mark = candles.first().map_or(0.0, |c| c.open);
        let symbol = instrument.symbol.clone();
        self.lock().markets.insert(
            symbol,
            Market {
                instrument,
                candles,
                revealed: 0,
                interval,
                mark,
            },
        );
    }

    /// Reveal up to `n` candles of `symbol` without matching orders (warm-up).
    pub fn preload(&self, symbol: &str, n: usize) {
        let mut state = self.lock();
        let mut new_clock = None;
        if let Some(market) = state.markets.get_mut(symbol) {
            market.revealed = n.min(market.candles.len());
            if let Some(last) = market.candles[..market.revealed].last() {
                market.mark = last.close;
                new_clock = Some(last.start_time + market.interval);
            }
        }
        if let Some(t) = new_clock {
            state.clock = state.clock.max(t);
        }
    }

    /// Reveal the next candle of `symbol` and match resting orders against it.
    /// Returns false when the symbol has no candles left.
    pub fn advance(&self, symbol: &str) -> bool {
        let mut state = self.lock();
        let Some(market) = state.markets.get_mut(symbol) else {
            return false;
        };
        if market.revealed >= market.candles.len() {
            return false;
        }
        let candle = market.candles[market.revealed].clone();
        market.revealed += 1;
        market.mark = candle.close;
        let close_time = candle.start_time + market.interval;

        state.clock = state.clock.max(close_time);
        state.match_candle(symbol, &candle);
        true
    }

    /// Advance every market by one candle. Returns false once all are exhausted.
    pub fn advance_all(&self) -> bool {
        let symbols: Vec<String> = self.lock().markets.keys().cloned().collect();
        let mut any = false;
        for symbol in symbols {
            any |= self.advance(&symbol);
        }
        any
    }

    pub fn has_more(&self, symbol: &str) -> bool {
        self.lock()
            .markets
            .get(symbol)
            .is_some_and(|m| m.revealed < m.candles.len())
    }

    /// Move the mark price and match resting orders as if price traded there.
    pub fn set_mark(&self, symbol: &str, price: f64) {
        let mut state = self.lock();
        let now = state.clock;
        if let Some(market) = state.markets.get_mut(symbol) {
            market.mark = price;
        } else {
            return;
        }
        let tick = Candle {
            start_time: now,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            is_closed: true,
        };
        state.match_candle(symbol, &tick);
    }

    /// Set the simulated clock.
    pub fn set_time(&self, now: DateTime<Utc>) {
        self.lock().clock = now;
    }

    /// Queue a fault for the next call of `op`.
    pub fn inject_fault(&self, op: FaultOp, fault: Fault) {
        self.lock().faults.entry(op).or_default().push_back(fault);
    }

    /// How many times `op` was called.
    pub fn calls(&self, op: FaultOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Every order ever placed for `symbol`, in placement order.
    pub fn orders(&self, symbol: &str) -> Vec<Order> {
        self.lock()
            .orders
            .values()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect()
    }

    pub fn open_orders(&self, symbol: &str) -> Vec<Order> {
        self.orders(symbol)
            .into_iter()
            .filter(|o| o.state.is_open())
            .collect()
    }

    /// Fill an open order completely at `price`, regardless of market data.
    pub fn force_fill(&self, order_id: &OrderId, price: f64) -> Result<(), ExchangeError> {
        self.force_fill_qty(order_id, f64::INFINITY, price)
    }

    /// Fill up to `qty` of an open order at `price`, leaving the rest resting.
    pub fn force_fill_qty(&self, order_id: &OrderId, qty: f64, price: f64) -> Result<(), ExchangeError> {
        let mut state = self.lock();
        let key = parse_id(order_id)?;
        let order = state
            .orders
            .get(&key)
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.0.clone()))?;
        if order.is_terminal() {
            return Err(ExchangeError::OrderNotActive(order_id.0.clone()));
        }
        let qty = qty.min(order.remaining_qty());
        state.execute(key, qty, price);
        Ok(())
    }

    /// Close a position outside of any order (liquidation, manual close).
    pub fn close_position_externally(&self, symbol: &str, direction: Direction) {
        let mut state = self.lock();
        state.positions.remove(&(symbol.to_string(), direction));
        state.cancel_orphaned_reduce_only(symbol, direction);
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_id(order_id: &OrderId) -> Result<u64, ExchangeError> {
    order_id
        .0
        .parse()
        .map_err(|_| ExchangeError::OrderNotFound(order_id.0.clone()))
}

impl PaperState {
    /// Count the call and pop a scripted fault, if any.
    fn take_fault(&mut self, op: FaultOp) -> Option<Fault> {
        *self.calls.entry(op).or_insert(0) += 1;
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn market(&self, symbol: &str) -> Result<&Market, ExchangeError> {
        self.markets
            .get(symbol)
            .ok_or_else(|| ExchangeError::InvalidSymbol(symbol.to_string()))
    }

    fn position_size(&self, symbol: &str, direction: Direction) -> f64 {
        self.positions
            .get(&(symbol.to_string(), direction))
            .map_or(0.0, |p| p.size)
    }

    fn validate(&self, request: &OrderRequest) -> Result<(), ExchangeError> {
        let market = self.market(&request.symbol)?;
        let inst = &market.instrument;

        if self.by_link.contains_key(&request.link_id) {
            return Err(ExchangeError::Rejected(format!(
                "duplicate order link id {}",
                request.link_id
            )));
        }
        if !(request.qty > 0.0) || request.qty < inst.min_qty * (1.0 - 1e-9) {
            return Err(ExchangeError::Rejected(format!(
                "qty {} below minimum {}",
                request.qty, inst.min_qty
            )));
        }
        if (inst.floor_qty(request.qty) - request.qty).abs() > inst.qty_step * 1e-6 {
            return Err(ExchangeError::Rejected(format!(
                "qty {} is not a multiple of {}",
                request.qty, inst.qty_step
            )));
        }
        if let Some(price) = request.kind.price() {
            if !(price > 0.0) {
                return Err(ExchangeError::Rejected(format!("invalid price {price}")));
            }
        }
        if request.reduce_only && self.position_size(&request.symbol, request.position) <= 0.0 {
            return Err(ExchangeError::Rejected(
                "reduce-only order without an open position".to_string(),
            ));
        }
        if let OrderKind::StopMarket { trigger } = request.kind {
            check_trigger(request.side, trigger, market.mark)?;
        }
        Ok(())
    }

    fn place(&mut self, request: &OrderRequest) -> Order {
        let id = self.next_id;
        self.next_id += 1;
        let order = Order::from_request(OrderId::from(id), request, self.clock);
        self.by_link.insert(request.link_id.clone(), id);
        self.orders.insert(id, order);

        let mark = self.markets.get(&request.symbol).map_or(0.0, |m| m.mark);
        let marketable = match request.kind {
            OrderKind::Market => true,
            OrderKind::Limit { price } => match request.side {
                Side::Buy => price >= mark,
                Side::Sell => price <= mark,
            },
            OrderKind::StopMarket { .. } => false,
        };
        if marketable {
            self.execute(id, request.qty, mark);
        }

        self.orders.get(&id).cloned().unwrap_or_else(|| {
            Order::from_request(OrderId::from(id), request, self.clock)
        })
    }

    /// Fill `qty` of order `id` at `price` and update the position.
    fn execute(&mut self, id: u64, qty: f64, price: f64) {
        let now = self.clock;
        let Some(order) = self.orders.get(&id) else {
            return;
        };
        let (symbol, direction, reduce_only) = (order.symbol.clone(), order.position, order.reduce_only);
        let key = (symbol.clone(), direction);
        let opening = Side::opening(direction) == order.side;

        let mut fill_qty = qty.min(order.remaining_qty());
        if reduce_only || !opening {
            fill_qty = fill_qty.min(self.position_size(&symbol, direction));
        }
        if fill_qty <= 0.0 {
            if let Some(order) = self.orders.get_mut(&id) {
                order.cancel(now);
            }
            return;
        }

        if let Some(order) = self.orders.get_mut(&id) {
            order.fill(fill_qty, price, now);
            // reduce-only remainder that cannot be filled is dropped
            if reduce_only && order.state == OrderState::PartiallyFilled {
                order.cancel(now);
            }
        }

        if opening {
            let pos = self.positions.entry(key).or_insert_with(|| Position {
                symbol: symbol.clone(),
                direction,
                size: 0.0,
                entry_price: 0.0,
            });
            let value = pos.entry_price * pos.size + price * fill_qty;
            pos.size += fill_qty;
            pos.entry_price = value / pos.size;
        } else {
            let flat = match self.positions.get_mut(&key) {
                Some(pos) => {
                    pos.size -= fill_qty;
                    pos.size <= 1e-12
                }
                None => true,
            };
            if flat {
                self.positions.remove(&key);
                self.cancel_orphaned_reduce_only(&symbol, direction);
            }
        }
    }

    fn cancel_orphaned_reduce_only(&mut self, symbol: &str, direction: Direction) {
        let now = self.clock;
        for order in self.orders.values_mut() {
            if order.symbol == symbol
                && order.position == direction
                && order.reduce_only
                && order.state.is_open()
            {
                order.cancel(now);
            }
        }
    }

    fn match_candle(&mut self, symbol: &str, candle: &Candle) {
        let resting: Vec<(u64, OrderKind, Side)> = self
            .orders
            .iter()
            .filter(|(_, o)| o.symbol == symbol && o.state.is_open())
            .map(|(id, o)| (*id, o.kind, o.side))
            .collect();

        let stops = resting
            .iter()
            .filter(|(_, kind, _)| matches!(kind, OrderKind::StopMarket { .. }));
        let limits = resting
            .iter()
            .filter(|(_, kind, _)| matches!(kind, OrderKind::Limit { .. }));

        for &(id, kind, side) in stops.chain(limits) {
            // an earlier fill in this candle may have cancelled it
            let still_open = self.orders.get(&id).is_some_and(|o| o.state.is_open());
            if !still_open {
                continue;
            }
            if let Some(price) = fill_price(kind, side, candle) {
                let qty = self.orders.get(&id).map_or(0.0, Order::remaining_qty);
                self.execute(id, qty, price);
            }
        }
    }
}

/// Sell stops must sit below the mark, buy stops above it.
fn check_trigger(side: Side, trigger: f64, mark: f64) -> Result<(), ExchangeError> {
    let valid = match side {
        Side::Sell => trigger < mark,
        Side::Buy => trigger > mark,
    };
    if valid {
        Ok(())
    } else {
        Err(ExchangeError::Rejected(format!(
            "{side:?} stop trigger {trigger} is on the wrong side of mark {mark}"
        )))
    }
}

/// Price at which a resting order fills within `candle`, if it does.
fn fill_price(kind: OrderKind, side: Side, candle: &Candle) -> Option<f64> {
    match (kind, side) {
        (OrderKind::StopMarket { trigger }, Side::Sell) if candle.low <= trigger => {
            Some(candle.open.min(trigger))
        }
        (OrderKind::StopMarket { trigger }, Side::Buy) if candle.high >= trigger => {
            Some(candle.open.max(trigger))
        }
        (OrderKind::Limit { price }, Side::Buy) if candle.low <= price => {
            Some(candle.open.min(price))
        }
        (OrderKind::Limit { price }, Side::Sell) if candle.high >= price => {
            Some(candle.open.max(price))
        }
        _ => None,
    }
}

impl Exchange for PaperExchange {
    fn server_time(&self) -> Result<DateTime<Utc>, ExchangeError> {
        Ok(self.lock().clock)
    }

    fn closed_candles(
        &self,
        symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut state = self.lock();
        if let Some(Fault::Error(e) | Fault::LostAck(e)) = state.take_fault(FaultOp::Candles) {
            return Err(e);
        }
        let market = state.market(symbol)?;
        let revealed = &market.candles[..market.revealed];
        let start = revealed.len().saturating_sub(limit);
        Ok(revealed[start..].to_vec())
    }

    fn instrument(&self, symbol: &str) -> Result<Instrument, ExchangeError> {
        let state = self.lock();
        Ok(state.market(symbol)?.instrument.clone())
    }

    fn mark_price(&self, symbol: &str) -> Result<f64, ExchangeError> {
        let mut state = self.lock();
        if let Some(Fault::Error(e) | Fault::LostAck(e)) = state.take_fault(FaultOp::MarkPrice) {
            return Err(e);
        }
        Ok(state.market(symbol)?.mark)
    }

    fn place_order(&self, request: &OrderRequest) -> Result<Order, ExchangeError> {
        let mut state = self.lock();
        let fault = state.take_fault(FaultOp::Place);
        if let Some(Fault::Error(e)) = fault {
            return Err(e);
        }
        state.validate(request)?;
        let order = state.place(request);
        if let Some(Fault::LostAck(e)) = fault {
            return Err(e);
        }
        Ok(order)
    }

    fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> Result<(), ExchangeError> {
        let mut state = self.lock();
        let fault = state.take_fault(FaultOp::Cancel);
        if let Some(Fault::Error(e)) = fault {
            return Err(e);
        }
        let key = parse_id(order_id)?;
        let now = state.clock;
        let order = state
            .orders
            .get_mut(&key)
            .filter(|o| o.symbol == symbol)
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.0.clone()))?;
        if order.is_terminal() {
            return Err(ExchangeError::OrderNotActive(order_id.0.clone()));
        }
        order.cancel(now);
        if let Some(Fault::LostAck(e)) = fault {
            return Err(e);
        }
        Ok(())
    }

    fn amend_order(
        &self,
        symbol: &str,
        order_id: &OrderId,
        new_price: f64,
    ) -> Result<(), ExchangeError> {
        let mut state = self.lock();
        let fault = state.take_fault(FaultOp::Amend);
        if let Some(Fault::Error(e)) = fault {
            return Err(e);
        }
        let key = parse_id(order_id)?;
        let mark = state.market(symbol)?.mark;
        let now = state.clock;
        let order = state
            .orders
            .get_mut(&key)
            .filter(|o| o.symbol == symbol)
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.0.clone()))?;
        if order.is_terminal() {
            return Err(ExchangeError::OrderNotActive(order_id.0.clone()));
        }
        match order.kind {
            OrderKind::Market => {
                return Err(ExchangeError::Rejected(
                    "market orders cannot be amended".to_string(),
                ))
            }
            OrderKind::StopMarket { .. } => check_trigger(order.side, new_price, mark)?,
            OrderKind::Limit { .. } => {}
        }
        order.kind = order.kind.with_price(new_price);
        order.updated_at = now;
        if let Some(Fault::LostAck(e)) = fault {
            return Err(e);
        }
        Ok(())
    }

    fn order_status(&self, symbol: &str, order_id: &OrderId) -> Result<Order, ExchangeError> {
        let mut state = self.lock();
        if let Some(Fault::Error(e) | Fault::LostAck(e)) = state.take_fault(FaultOp::Status) {
            return Err(e);
        }
        let key = parse_id(order_id)?;
        state
            .orders
            .get(&key)
            .filter(|o| o.symbol == symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::OrderNotFound(order_id.0.clone()))
    }

    fn order_by_link_id(
        &self,
        symbol: &str,
        link_id: &LinkId,
    ) -> Result<Option<Order>, ExchangeError> {
        let mut state = self.lock();
        if let Some(Fault::Error(e) | Fault::LostAck(e)) = state.take_fault(FaultOp::LinkLookup) {
            return Err(e);
        }
        Ok(state
            .by_link
            .get(link_id)
            .and_then(|id| state.orders.get(id))
            .filter(|o| o.symbol == symbol)
            .cloned())
    }

    fn position(
        &self,
        symbol: &str,
        direction: Direction,
    ) -> Result<Option<Position>, ExchangeError> {
        let mut state = self.lock();
        if let Some(Fault::Error(e) | Fault::LostAck(e)) = state.take_fault(FaultOp::Position) {
            return Err(e);
        }
        state.market(symbol)?;
        Ok(state
            .positions
            .get(&(symbol.to_string(), direction))
            .filter(|p| !p.is_flat())
            .cloned())
    }
}
