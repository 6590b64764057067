//! Domain types for perpbot

pub mod candle;
pub mod ids;
pub mod instrument;
pub mod order;
pub mod position;
pub mod signal;
pub mod trade;

pub use candle::{closed_only, Candle};
pub use ids::{LinkId, LinkPurpose, OrderId, TradeId};
pub use instrument::{Instrument, InstrumentError, TickPolicy};
pub use order::{Order, OrderKind, OrderRequest, OrderState, Side};
pub use position::Position;
pub use signal::{Direction, EntryMode, Signal};
pub use trade::{ExitReason, TradeRecord};

/// Symbol type alias
pub type Symbol = String;
