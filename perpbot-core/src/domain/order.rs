//! Order types and the exchange-side order lifecycle.

use super::ids::{LinkId, OrderId};
use super::signal::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Side that opens a position in `direction`.
    pub fn opening(direction: Direction) -> Self {
        match direction {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }

    /// Side that reduces a position in `direction`.
    pub fn closing(direction: Direction) -> Self {
        Self::opening(direction.opposite())
    }
}

/// What kind of order and its price parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderKind {
    /// Fill immediately at the current price.
    Market,
    /// Fill at limit price or better.
    Limit { price: f64 },
    /// Triggers when price reaches the trigger level, then fills as market.
    StopMarket { trigger: f64 },
}

impl OrderKind {
    pub fn price(&self) -> Option<f64> {
        match self {
            OrderKind::Market => None,
            OrderKind::Limit { price } => Some(*price),
            OrderKind::StopMarket { trigger } => Some(*trigger),
        }
    }

    pub fn with_price(self, new_price: f64) -> Self {
        match self {
            OrderKind::Market => OrderKind::Market,
            OrderKind::Limit { .. } => OrderKind::Limit { price: new_price },
            OrderKind::StopMarket { .. } => OrderKind::StopMarket { trigger: new_price },
        }
    }
}

/// Order lifecycle state as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderState {
    /// Accepted and resting (or untriggered).
    New,
    /// Some quantity filled, the rest still working.
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected
        )
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

/// Everything needed to submit one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub qty: f64,
    pub reduce_only: bool,
    /// Hedge-mode position this order belongs to.
    pub position: Direction,
    pub link_id: LinkId,
}

impl OrderRequest {
    pub fn entry(
        symbol: &str,
        direction: Direction,
        kind: OrderKind,
        qty: f64,
        link_id: LinkId,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Side::opening(direction),
            kind,
            qty,
            reduce_only: false,
            position: direction,
            link_id,
        }
    }

    pub fn exit(
        symbol: &str,
        direction: Direction,
        kind: OrderKind,
        qty: f64,
        link_id: LinkId,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Side::closing(direction),
            kind,
            qty,
            reduce_only: true,
            position: direction,
            link_id,
        }
    }
}

/// An order as known to the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub link_id: LinkId,
    pub symbol: String,
    pub side: Side,
    pub kind: OrderKind,
    pub qty: f64,
    pub filled_qty: f64,
    /// Volume-weighted fill price, present once anything filled.
    pub avg_fill_price: Option<f64>,
    pub reduce_only: bool,
    pub position: Direction,
    pub state: OrderState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn from_request(id: OrderId, request: &OrderRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            link_id: request.link_id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            kind: request.kind,
            qty: request.qty,
            filled_qty: 0.0,
            avg_fill_price: None,
            reduce_only: request.reduce_only,
            position: request.position,
            state: OrderState::New,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn remaining_qty(&self) -> f64 {
        (self.qty - self.filled_qty).max(0.0)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Record a (partial or complete) fill at `price`.
    pub fn fill(&mut self, qty: f64, price: f64, now: DateTime<Utc>) {
        let qty = qty.min(self.remaining_qty());
        if qty <= 0.0 {
            return;
        }
        let prev_value = self.avg_fill_price.unwrap_or(0.0) * self.filled_qty;
        self.filled_qty += qty;
        self.avg_fill_price = Some((prev_value + qty * price) / self.filled_qty);
        self.state = if self.remaining_qty() <= f64::EPSILON * self.qty.max(1.0) {
            OrderState::Filled
        } else {
            OrderState::PartiallyFilled
        };
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        if !self.is_terminal() {
            self.state = OrderState::Cancelled;
            self.updated_at = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
    }

    fn limit_order(qty: f64) -> Order {
        let request = OrderRequest::entry(
            "BTCUSDT",
            Direction::Long,
            OrderKind::Limit { price: 100.0 },
            qty,
            LinkId::new("pb-test-en"),
        );
        Order::from_request(OrderId::from(1), &request, now())
    }

    #[test]
    fn test_order_sides() {
        assert_eq!(Side::opening(Direction::Long), Side::Buy);
        assert_eq!(Side::closing(Direction::Long), Side::Sell);
        assert_eq!(Side::opening(Direction::Short), Side::Sell);
        assert_eq!(Side::closing(Direction::Short), Side::Buy);
    }

    #[test]
    fn test_exit_request_is_reduce_only() {
        let req = OrderRequest::exit(
            "BTCUSDT",
            Direction::Short,
            OrderKind::Market,
            1.0,
            LinkId::new("x"),
        );
        assert!(req.reduce_only);
        assert_eq!(req.side, Side::Buy);
        assert_eq!(req.position, Direction::Short);
    }

    #[test]
    fn test_partial_then_full_fill() {
        let mut order = limit_order(2.0);
        order.fill(0.5, 100.0, now());
        assert_eq!(order.state, OrderState::PartiallyFilled);
        assert_eq!(order.remaining_qty(), 1.5);

        order.fill(1.5, 104.0, now());
        assert_eq!(order.state, OrderState::Filled);
        assert!(order.is_terminal());
        // (0.5*100 + 1.5*104) / 2 = 103
        assert!((order.avg_fill_price.unwrap() - 103.0).abs() < 1e-9);
    }

    #[test]
    fn test_overfill_is_clamped() {
        let mut order = limit_order(1.0);
        order.fill(5.0, 100.0, now());
        assert_eq!(order.filled_qty, 1.0);
        assert_eq!(order.state, OrderState::Filled);
    }

    #[test]
    fn test_cancel_terminal_is_noop() {
        let mut order = limit_order(1.0);
        order.fill(1.0, 100.0, now());
        order.cancel(now());
        assert_eq!(order.state, OrderState::Filled);
    }

    #[test]
    fn test_kind_with_price() {
        assert_eq!(
            OrderKind::StopMarket { trigger: 1.0 }.with_price(2.0),
            OrderKind::StopMarket { trigger: 2.0 }
        );
        assert_eq!(OrderKind::Market.price(), None);
    }
}
