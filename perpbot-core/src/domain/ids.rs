use super::signal::Direction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exchange-assigned order ID. Exists only once the exchange accepted the order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic trade ID (symbol + direction + signal bar).
///
/// The same signal always yields the same trade ID, so a restarted process
/// derives the same correlation tokens for orders it may already have sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub String);

impl TradeId {
    pub fn derive(symbol: &str, direction: Direction, bar_time: DateTime<Utc>) -> Self {
        use serde_json::json;

        let canonical = json!({
            "symbol": symbol,
            "direction": direction,
            "bar_time": bar_time.timestamp_millis(),
        });

        let hash = blake3::hash(canonical.to_string().as_bytes());
        // 16 hex chars keeps derived link ids under the 36-char exchange limit
        Self(hash.to_hex()[..16].to_string())
    }
}

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a particular order does for its trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkPurpose {
    Entry,
    /// Take-profit leg of the given protection attempt (1-based).
    TakeProfit(u32),
    /// Stop-loss leg of the given protection attempt (1-based).
    StopLoss(u32),
    /// Reduce-only market order that flattens the position, per try (1-based).
    Flatten(u32),
}

impl LinkPurpose {
    fn tag(self) -> String {
        match self {
            LinkPurpose::Entry => "en".to_string(),
            LinkPurpose::TakeProfit(n) => format!("tp{n}"),
            LinkPurpose::StopLoss(n) => format!("sl{n}"),
            LinkPurpose::Flatten(n) => format!("fl{n}"),
        }
    }
}

/// Client correlation token (exchange "order link id").
///
/// Generated locally before submission and reused across retries of the same
/// logical order, so the exchange can be asked whether an attempt whose
/// response was lost actually went through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub String);

impl LinkId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn for_trade(trade_id: &TradeId, purpose: LinkPurpose) -> Self {
        Self(format!("pb-{}-{}", trade_id.0, purpose.tag()))
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
