//! BracketManager — drives each trade from signal to closure.
//!
//! # Responsibilities
//! - Enforce per-direction trade limits and the hedge-mode rule
//! - Cancel pending entries of the opposite direction on a reversal signal
//! - Size and submit entries, then protect fills with a TP limit and SL stop
//! - Poll legs, cancel the sibling when one fills, record the trade
//! - Trail the stop, time out stale entries and overlong holds
//! - Reconcile local state against exchange positions
//!
//! # Non-Responsibilities
//! - Does NOT decide direction (signal engine)
//! - Does NOT retry exchange calls itself (executor)
//!
//! The manager is per symbol and stateless apart from configuration; all
//! trade state lives in the [`BracketBook`] passed to each call.

use super::book::BracketBook;
use super::config::{BracketConfig, BracketError};
use super::events::{BracketEvent, SkipReason};
use super::state::{Bracket, BracketPhase, CancelReason, Leg, PendingExit};
use super::trailing::TrailingState;
use crate::domain::{
    Direction, EntryMode, ExitReason, Instrument, LinkId, LinkPurpose, Order, OrderId,
    OrderKind, OrderRequest, OrderState, Signal, TickPolicy, TradeId, TradeRecord,
};
use crate::orders::{CancelOutcome, ExecError, OrderExecutor};
use crate::sizing::PositionSizer;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

/// Take-profit and stop-loss prices for an entry, rounded to the tick.
///
/// The take-profit is rounded toward the entry, the stop-loss to the nearest
/// tick.
pub fn bracket_prices(
    direction: Direction,
    entry_price: f64,
    atr: f64,
    config: &BracketConfig,
    instrument: &Instrument,
) -> (f64, f64) {
    let sign = direction.sign();
    let tp = entry_price + sign * atr * config.tp_atr_mult;
    let sl = entry_price - sign * atr * config.sl_atr_mult;
    let tp_policy = match direction {
        Direction::Long => TickPolicy::RoundDown,
        Direction::Short => TickPolicy::RoundUp,
    };
    (
        instrument.round_price(tp, tp_policy),
        instrument.round_price(sl, TickPolicy::RoundNearest),
    )
}

pub struct BracketManager {
    executor: OrderExecutor,
    instrument: Instrument,
    sizer: PositionSizer,
    config: BracketConfig,
}

impl BracketManager {
    pub fn new(
        executor: OrderExecutor,
        instrument: Instrument,
        sizer: PositionSizer,
        config: BracketConfig,
    ) -> Result<Self, BracketError> {
        config.validate()?;
        instrument.validate()?;
        Ok(Self {
            executor,
            instrument,
            sizer,
            config,
        })
    }

    pub fn config(&self) -> &BracketConfig {
        &self.config
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    // ── Entry ──

    /// Handle a new signal: failsafe-cancel opposite pending entries, check
    /// limits, size, and submit the entry.
    ///
    /// Returns an error only when a reversal cancel could not be confirmed or
    /// the mark price is unavailable; no new entry is submitted in that case.
    pub fn on_signal(
        &self,
        book: &mut BracketBook,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<Vec<BracketEvent>, BracketError> {
        let mut events = Vec::new();
        let trade_id = TradeId::derive(&signal.symbol, signal.direction, signal.bar_time);

        if book.contains(&trade_id) {
            events.push(skipped(signal, SkipReason::Duplicate));
            return Ok(events);
        }

        // Failsafe: no opposite entry may still be waiting when a reversal arrives.
        for id in book.active_ids() {
            let Some(mut bracket) = book.take(&id) else {
                continue;
            };
            let result = if bracket.direction == signal.direction.opposite() && bracket.is_pending()
            {
                info!(
                    "{}: {} signal cancels pending {} entry {}",
                    signal.symbol, signal.direction, bracket.direction, bracket.trade_id
                );
                self.cancel_pending(&mut bracket, CancelReason::Reversal, now, &mut events)
            } else {
                Ok(())
            };
            book.restore(bracket);
            result?;
        }

        if !self.config.hedge_mode && book.has_position(signal.direction.opposite()) {
            debug!(
                "{}: {} signal skipped, {} position open and hedge mode is off",
                signal.symbol,
                signal.direction,
                signal.direction.opposite()
            );
            events.push(skipped(signal, SkipReason::OppositePosition));
            return Ok(events);
        }

        if book.active_count(signal.direction) >= self.config.max_trades(signal.direction) {
            debug!(
                "{}: {} signal skipped, trade limit reached",
                signal.symbol, signal.direction
            );
            events.push(skipped(signal, SkipReason::LimitReached));
            return Ok(events);
        }

        let (kind, sizing_price) = match signal.entry_mode {
            EntryMode::Market => (OrderKind::Market, self.executor.mark_price(&signal.symbol)?),
            EntryMode::Limit => {
                let price = self
                    .instrument
                    .round_price(signal.basis_price, TickPolicy::RoundNearest);
                (OrderKind::Limit { price }, price)
            }
        };

        let qty = match self.sizer.size(sizing_price, &self.instrument) {
            Ok(qty) => qty,
            Err(e) => {
                warn!("{}: {} signal not traded: {e}", signal.symbol, signal.direction);
                events.push(skipped(signal, SkipReason::Sizing(e.to_string())));
                return Ok(events);
            }
        };

        let link_id = LinkId::for_trade(&trade_id, LinkPurpose::Entry);
        let request =
            OrderRequest::entry(&signal.symbol, signal.direction, kind, qty, link_id.clone());
        let mut bracket = Bracket {
            trade_id: trade_id.clone(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            qty,
            signal: signal.clone(),
            phase: BracketPhase::PendingEntry {
                entry: None,
                link_id,
                submitted_at: now,
            },
        };

        match self.executor.submit(&request) {
            Ok(outcome) => {
                let order_id = outcome.value.id.clone();
                info!(
                    "{}: {} entry {} submitted, qty {} {:?} as order {}",
                    signal.symbol, signal.direction, trade_id, qty, kind, order_id
                );
                if let BracketPhase::PendingEntry { entry, .. } = &mut bracket.phase {
                    *entry = Some(order_id.clone());
                }
                events.push(BracketEvent::EntrySubmitted {
                    trade_id,
                    direction: signal.direction,
                    qty,
                    order_id: Some(order_id),
                    limit_price: kind.price(),
                });
                // a market entry is usually filled already
                self.step_pending(&mut bracket, now, &mut events);
            }
            Err(e) if e.is_rejection() => {
                warn!("{}: entry {} rejected: {e}", signal.symbol, trade_id);
                bracket.phase = BracketPhase::Cancelled {
                    reason: CancelReason::Rejected,
                    at: now,
                };
                events.push(BracketEvent::EntryCancelled {
                    trade_id,
                    reason: CancelReason::Rejected,
                });
            }
            Err(e) => {
                warn!(
                    "{}: entry {} outcome unknown ({e}), will look it up by link id",
                    signal.symbol, trade_id
                );
                events.push(BracketEvent::EntrySubmitted {
                    trade_id,
                    direction: signal.direction,
                    qty,
                    order_id: None,
                    limit_price: kind.price(),
                });
            }
        }

        book.restore(bracket);
        Ok(events)
    }

    // ── Per-tick maintenance ──

    /// Advance every active bracket by one step.
    pub fn advance(&self, book: &mut BracketBook, now: DateTime<Utc>) -> Vec<BracketEvent> {
        let mut events = Vec::new();
        if book.is_empty() {
            return events;
        }

        let mark = match self.executor.mark_price(book.symbol()) {
            Ok(price) => Some(price),
            Err(e) => {
                warn!("{}: no mark price this tick: {e}", book.symbol());
                None
            }
        };

        for id in book.active_ids() {
            let Some(mut bracket) = book.take(&id) else {
                continue;
            };
            match bracket.phase {
                BracketPhase::PendingEntry { .. } => self.step_pending(&mut bracket, now, &mut events),
                BracketPhase::Filled { .. } => self.protect(&mut bracket, now, &mut events),
                BracketPhase::BracketPlaced { .. } => {
                    self.step_placed(&mut bracket, now, mark, &mut events)
                }
                BracketPhase::Closed { .. } | BracketPhase::Cancelled { .. } => {}
            }
            book.restore(bracket);
        }
        events
    }

    /// Compare protected brackets with exchange positions. A position that
    /// disappeared without either leg filling closes the trade as reconciled.
    pub fn reconcile(&self, book: &mut BracketBook, now: DateTime<Utc>) -> Vec<BracketEvent> {
        let mut events = Vec::new();
        for id in book.active_ids() {
            let Some(mut bracket) = book.take(&id) else {
                continue;
            };
            if matches!(bracket.phase, BracketPhase::BracketPlaced { .. }) {
                match self.executor.position(&bracket.symbol, bracket.direction) {
                    Ok(Some(_)) => {}
                    Ok(None) => self.position_gone(&mut bracket, now, &mut events),
                    Err(e) => warn!(
                        "{}: position check for {} failed: {e}",
                        bracket.symbol, bracket.trade_id
                    ),
                }
            }
            book.restore(bracket);
        }
        events
    }

    /// Close every active bracket: pending entries are cancelled, positions
    /// are flattened with a reduce-only market order.
    pub fn force_close_all(
        &self,
        book: &mut BracketBook,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Vec<BracketEvent> {
        let mut events = Vec::new();
        for id in book.active_ids() {
            let Some(mut bracket) = book.take(&id) else {
                continue;
            };
            self.force_close(&mut bracket, reason, now, &mut events);
            book.restore(bracket);
        }
        events
    }

    // ── Pending entry ──

    fn step_pending(&self, bracket: &mut Bracket, now: DateTime<Utc>, events: &mut Vec<BracketEvent>) {
        let BracketPhase::PendingEntry {
            entry,
            link_id,
            submitted_at,
        } = &bracket.phase
        else {
            return;
        };
        let (entry, link_id, submitted_at) = (entry.clone(), link_id.clone(), *submitted_at);

        let entry_id = match entry {
            Some(id) => id,
            None => match self.executor.find_by_link(&bracket.symbol, &link_id) {
                Ok(Some(order)) => {
                    info!(
                        "{}: entry {} found on exchange as {}",
                        bracket.symbol, bracket.trade_id, order.id
                    );
                    bracket.phase = BracketPhase::PendingEntry {
                        entry: Some(order.id.clone()),
                        link_id,
                        submitted_at,
                    };
                    order.id
                }
                Ok(None) => {
                    warn!(
                        "{}: entry {} never reached the exchange",
                        bracket.symbol, bracket.trade_id
                    );
                    self.mark_cancelled(bracket, CancelReason::SubmitFailed, now, events);
                    return;
                }
                Err(e) => {
                    warn!("{}: entry {} lookup failed: {e}", bracket.symbol, bracket.trade_id);
                    return;
                }
            },
        };

        let order = match self.executor.status(&bracket.symbol, &entry_id) {
            Ok(order) => order,
            Err(e) => {
                warn!("{}: entry {} status failed: {e}", bracket.symbol, bracket.trade_id);
                return;
            }
        };

        match order.state {
            OrderState::Filled => self.on_entry_fill(bracket, &order, now, events),
            OrderState::Cancelled | OrderState::Rejected => {
                if order.filled_qty > 0.0 {
                    self.on_entry_fill(bracket, &order, now, events);
                } else {
                    let reason = if order.state == OrderState::Rejected {
                        CancelReason::Rejected
                    } else {
                        CancelReason::External
                    };
                    self.mark_cancelled(bracket, reason, now, events);
                }
            }
            OrderState::New | OrderState::PartiallyFilled => {
                if now - submitted_at >= self.config.order_timeout {
                    info!(
                        "{}: entry {} not filled within {}s, cancelling",
                        bracket.symbol,
                        bracket.trade_id,
                        self.config.order_timeout.num_seconds()
                    );
                    if let Err(e) = self.cancel_pending(bracket, CancelReason::Timeout, now, events) {
                        warn!("{}: timeout cancel of {} failed: {e}", bracket.symbol, bracket.trade_id);
                    }
                }
            }
        }
    }

    /// Cancel a pending entry. A fill revealed by the cancel is honoured.
    fn cancel_pending(
        &self,
        bracket: &mut Bracket,
        reason: CancelReason,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) -> Result<(), ExecError> {
        let BracketPhase::PendingEntry { entry, link_id, .. } = &bracket.phase else {
            return Ok(());
        };
        let entry_id = match entry {
            Some(id) => Some(id.clone()),
            None => self
                .executor
                .find_by_link(&bracket.symbol, link_id)?
                .map(|order| order.id),
        };
        let Some(entry_id) = entry_id else {
            self.mark_cancelled(bracket, reason, now, events);
            return Ok(());
        };

        let outcome = self.executor.cancel(&bracket.symbol, &entry_id)?;
        let order = self.executor.status(&bracket.symbol, &entry_id)?;
        if order.filled_qty > 0.0 {
            if outcome.value == CancelOutcome::AlreadyInactive {
                info!(
                    "{}: entry {} filled before it could be cancelled",
                    bracket.symbol, bracket.trade_id
                );
            }
            self.on_entry_fill(bracket, &order, now, events);
        } else {
            self.mark_cancelled(bracket, reason, now, events);
        }
        Ok(())
    }

    fn mark_cancelled(
        &self,
        bracket: &mut Bracket,
        reason: CancelReason,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) {
        info!(
            "{}: {} entry {} cancelled ({reason})",
            bracket.symbol, bracket.direction, bracket.trade_id
        );
        bracket.phase = BracketPhase::Cancelled { reason, at: now };
        events.push(BracketEvent::EntryCancelled {
            trade_id: bracket.trade_id.clone(),
            reason,
        });
    }

    fn on_entry_fill(
        &self,
        bracket: &mut Bracket,
        order: &Order,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) {
        let entry_price = order.avg_fill_price.unwrap_or(bracket.signal.basis_price);
        if order.filled_qty < bracket.qty {
            info!(
                "{}: entry {} partially filled, protecting {} of {}",
                bracket.symbol, bracket.trade_id, order.filled_qty, bracket.qty
            );
        }
        bracket.qty = order.filled_qty;
        bracket.phase = BracketPhase::Filled {
            entry_price,
            filled_at: now,
            attempts: 0,
            link_base: 0,
            exit: None,
        };
        info!(
            "{}: {} entry {} filled {} @ {}",
            bracket.symbol, bracket.direction, bracket.trade_id, bracket.qty, entry_price
        );
        events.push(BracketEvent::EntryFilled {
            trade_id: bracket.trade_id.clone(),
            price: entry_price,
            qty: bracket.qty,
        });
        self.protect(bracket, now, events);
    }

    // ── Protection ──

    /// Place TP and SL for a filled entry. After `protection_attempts`
    /// failures the position is flattened. A bracket already owing an exit
    /// retries the flatten instead.
    fn protect(&self, bracket: &mut Bracket, now: DateTime<Utc>, events: &mut Vec<BracketEvent>) {
        let BracketPhase::Filled {
            entry_price,
            filled_at,
            attempts,
            link_base,
            exit,
        } = bracket.phase
        else {
            return;
        };
        if let Some(pending) = exit {
            self.exit_position(bracket, entry_price, filled_at, pending, now, events);
            return;
        }

        let atr = bracket.signal.atr_at_signal;
        let (tp_price, sl_price) =
            bracket_prices(bracket.direction, entry_price, atr, &self.config, &self.instrument);

        let max_attempts = self.config.protection_attempts;
        let mut attempt = attempts;
        let mut last_error = String::from("no attempt made");

        while attempt < max_attempts {
            attempt += 1;
            let link_round = link_base + attempt;
            match self.place_legs(bracket, tp_price, sl_price, link_round) {
                Ok((take_profit, stop_loss)) => {
                    info!(
                        "{}: {} {} protected, TP {} SL {}",
                        bracket.symbol, bracket.direction, bracket.trade_id, tp_price, sl_price
                    );
                    let trailing = TrailingState::new(
                        &self.config.trailing,
                        bracket.direction,
                        entry_price,
                        tp_price,
                        sl_price,
                        atr,
                    );
                    bracket.phase = BracketPhase::BracketPlaced {
                        entry_price,
                        filled_at,
                        take_profit,
                        stop_loss,
                        trailing,
                        link_round,
                    };
                    events.push(BracketEvent::BracketPlaced {
                        trade_id: bracket.trade_id.clone(),
                        take_profit: tp_price,
                        stop_loss: sl_price,
                    });
                    return;
                }
                Err(e @ ExecError::Aborted { .. }) => {
                    warn!(
                        "{}: protection of {} interrupted: {e}",
                        bracket.symbol, bracket.trade_id
                    );
                    bracket.phase = BracketPhase::Filled {
                        entry_price,
                        filled_at,
                        attempts: attempt - 1,
                        link_base,
                        exit: None,
                    };
                    return;
                }
                Err(e) => {
                    warn!(
                        "{}: protection attempt {attempt}/{max_attempts} for {} failed: {e}",
                        bracket.symbol, bracket.trade_id
                    );
                    last_error = e.to_string();
                }
            }
        }

        let message = format!(
            "{} {} position of {} is unprotected after {} attempts ({last_error}), flattening",
            bracket.symbol, bracket.direction, bracket.qty, attempt
        );
        error!("{message}");
        events.push(BracketEvent::Critical {
            trade_id: bracket.trade_id.clone(),
            message,
        });
        events.push(BracketEvent::Unprotected {
            trade_id: bracket.trade_id.clone(),
            attempts: attempt,
            error: last_error,
        });
        let pending = PendingExit {
            reason: ExitReason::Unprotected,
            tries: 0,
        };
        self.exit_position(bracket, entry_price, filled_at, pending, now, events);
    }

    /// Submit SL then TP. On failure nothing is left resting.
    fn place_legs(
        &self,
        bracket: &Bracket,
        tp_price: f64,
        sl_price: f64,
        attempt: u32,
    ) -> Result<(Leg, Leg), ExecError> {
        let symbol = &bracket.symbol;
        let sl_link = LinkId::for_trade(&bracket.trade_id, LinkPurpose::StopLoss(attempt));
        let tp_link = LinkId::for_trade(&bracket.trade_id, LinkPurpose::TakeProfit(attempt));

        let sl_request = OrderRequest::exit(
            symbol,
            bracket.direction,
            OrderKind::StopMarket { trigger: sl_price },
            bracket.qty,
            sl_link.clone(),
        );
        let sl_order = match self.executor.submit(&sl_request) {
            Ok(outcome) => outcome.value,
            Err(e) => {
                self.discard_unknown(symbol, &sl_link, &e);
                return Err(e);
            }
        };

        let tp_request = OrderRequest::exit(
            symbol,
            bracket.direction,
            OrderKind::Limit { price: tp_price },
            bracket.qty,
            tp_link.clone(),
        );
        let tp_order = match self.executor.submit(&tp_request) {
            Ok(outcome) => outcome.value,
            Err(e) => {
                self.discard_unknown(symbol, &tp_link, &e);
                self.cancel_quietly(symbol, &sl_order.id);
                return Err(e);
            }
        };

        Ok((
            Leg {
                order_id: tp_order.id,
                link_id: tp_link,
                price: tp_price,
            },
            Leg {
                order_id: sl_order.id,
                link_id: sl_link,
                price: sl_price,
            },
        ))
    }

    /// After a submit with an unknown outcome, cancel the order if it landed.
    fn discard_unknown(&self, symbol: &str, link_id: &LinkId, err: &ExecError) {
        if err.is_rejection() {
            return;
        }
        match self.executor.find_by_link(symbol, link_id) {
            Ok(Some(order)) if order.state.is_open() => self.cancel_quietly(symbol, &order.id),
            Ok(_) => {}
            Err(e) => warn!("{symbol}: could not check for stray order {link_id}: {e}"),
        }
    }

    fn cancel_quietly(&self, symbol: &str, order_id: &OrderId) {
        match self.executor.cancel(symbol, order_id) {
            Ok(outcome) if outcome.value == CancelOutcome::AlreadyInactive => {
                debug!("{symbol}: order {order_id} already inactive");
            }
            Ok(_) => {}
            Err(e) => warn!("{symbol}: cancel of {order_id} failed: {e}"),
        }
    }

    // ── Protected position ──

    fn step_placed(
        &self,
        bracket: &mut Bracket,
        now: DateTime<Utc>,
        mark: Option<f64>,
        events: &mut Vec<BracketEvent>,
    ) {
        let BracketPhase::BracketPlaced {
            entry_price,
            filled_at,
            ..
        } = bracket.phase
        else {
            return;
        };

        if self.check_legs(bracket, now, events) {
            return;
        }

        if let Some(max_hold) = self.config.max_hold {
            if now - filled_at >= max_hold {
                info!(
                    "{}: {} held longer than {}s, closing",
                    bracket.symbol,
                    bracket.trade_id,
                    max_hold.num_seconds()
                );
                self.force_close(bracket, ExitReason::Timeout, now, events);
                return;
            }
        }

        if let Some(price) = mark {
            self.trail(bracket, entry_price, price, events);
        }
    }

    /// Current exchange state of the stop-loss and take-profit legs.
    fn poll_legs(&self, bracket: &Bracket) -> Option<(Order, Order)> {
        let (tp, sl) = bracket.legs()?;
        let sl_order = match self.executor.status(&bracket.symbol, &sl.order_id) {
            Ok(order) => order,
            Err(e) => {
                warn!("{}: SL status for {} failed: {e}", bracket.symbol, bracket.trade_id);
                return None;
            }
        };
        let tp_order = match self.executor.status(&bracket.symbol, &tp.order_id) {
            Ok(order) => order,
            Err(e) => {
                warn!("{}: TP status for {} failed: {e}", bracket.symbol, bracket.trade_id);
                return None;
            }
        };
        Some((sl_order, tp_order))
    }

    /// Close the bracket if either leg filled. When both report fills the
    /// stop is taken (worse exit).
    fn close_if_leg_filled(
        &self,
        bracket: &mut Bracket,
        sl_order: &Order,
        tp_order: &Order,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) -> bool {
        if sl_order.state == OrderState::Filled {
            self.close_by_leg(bracket, sl_order, &tp_order.id, now, events);
            true
        } else if tp_order.state == OrderState::Filled {
            self.close_by_leg(bracket, tp_order, &sl_order.id, now, events);
            true
        } else {
            false
        }
    }

    /// Poll both legs. Closes the bracket and returns true when one filled or
    /// both vanished along with the position.
    fn check_legs(
        &self,
        bracket: &mut Bracket,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) -> bool {
        let Some((sl_order, tp_order)) = self.poll_legs(bracket) else {
            return false;
        };
        if self.close_if_leg_filled(bracket, &sl_order, &tp_order, now, events) {
            return true;
        }
        if sl_order.is_terminal() && tp_order.is_terminal() {
            self.legs_vanished(bracket, now, events);
            return !bracket.has_position();
        }
        false
    }

    /// Both legs are inactive without a fill.
    fn legs_vanished(&self, bracket: &mut Bracket, now: DateTime<Utc>, events: &mut Vec<BracketEvent>) {
        let BracketPhase::BracketPlaced {
            entry_price,
            filled_at,
            link_round,
            ..
        } = bracket.phase
        else {
            return;
        };
        match self.executor.position(&bracket.symbol, bracket.direction) {
            Ok(None) => self.close_reconciled(bracket, now, events),
            Ok(Some(position)) => {
                let message = format!(
                    "both exit legs inactive but position of {} still open, re-protecting",
                    position.size
                );
                warn!("{}: {} {message}", bracket.symbol, bracket.trade_id);
                events.push(BracketEvent::Inconsistent {
                    trade_id: bracket.trade_id.clone(),
                    message,
                });
                bracket.qty = position.size;
                bracket.phase = BracketPhase::Filled {
                    entry_price,
                    filled_at,
                    attempts: 0,
                    link_base: link_round,
                    exit: None,
                };
                self.protect(bracket, now, events);
            }
            Err(e) => warn!(
                "{}: position check for {} failed: {e}",
                bracket.symbol, bracket.trade_id
            ),
        }
    }

    /// The exchange shows no position for a protected bracket.
    fn position_gone(&self, bracket: &mut Bracket, now: DateTime<Utc>, events: &mut Vec<BracketEvent>) {
        // a leg fill explains it
        if self.check_legs(bracket, now, events) {
            return;
        }
        self.close_reconciled(bracket, now, events);
    }

    fn close_reconciled(&self, bracket: &mut Bracket, now: DateTime<Utc>, events: &mut Vec<BracketEvent>) {
        let BracketPhase::BracketPlaced {
            entry_price,
            filled_at,
            ref take_profit,
            ref stop_loss,
            ..
        } = bracket.phase
        else {
            return;
        };
        let (tp_id, sl_id) = (take_profit.order_id.clone(), stop_loss.order_id.clone());

        let message = "position closed outside the bot".to_string();
        warn!("{}: {} {message}", bracket.symbol, bracket.trade_id);
        events.push(BracketEvent::Inconsistent {
            trade_id: bracket.trade_id.clone(),
            message,
        });

        self.cancel_quietly(&bracket.symbol, &sl_id);
        self.cancel_quietly(&bracket.symbol, &tp_id);
        let exit_price = self
            .executor
            .mark_price(&bracket.symbol)
            .unwrap_or(entry_price);
        self.close(
            bracket,
            entry_price,
            filled_at,
            exit_price,
            ExitReason::Reconciled,
            now,
            events,
        );
    }

    /// One leg filled: cancel its sibling and record the trade.
    fn close_by_leg(
        &self,
        bracket: &mut Bracket,
        filled: &Order,
        sibling: &OrderId,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) {
        let BracketPhase::BracketPlaced {
            entry_price,
            filled_at,
            ref take_profit,
            ref trailing,
            ..
        } = bracket.phase
        else {
            return;
        };

        let reason = if filled.id == take_profit.order_id {
            ExitReason::TakeProfit
        } else if trailing.has_trailed() {
            ExitReason::TrailingStop
        } else {
            ExitReason::StopLoss
        };
        let exit_price = filled
            .avg_fill_price
            .or(filled.kind.price())
            .unwrap_or(entry_price);

        self.cancel_quietly(&bracket.symbol, sibling);
        self.close(bracket, entry_price, filled_at, exit_price, reason, now, events);
    }

    fn trail(&self, bracket: &mut Bracket, entry_price: f64, price: f64, events: &mut Vec<BracketEvent>) {
        let symbol = bracket.symbol.clone();
        let trade_id = bracket.trade_id.clone();
        let direction = bracket.direction;
        let BracketPhase::BracketPlaced {
            stop_loss,
            trailing,
            ..
        } = &mut bracket.phase
        else {
            return;
        };

        let step = trailing.observe(price);
        if step.armed_now {
            info!("{symbol}: trailing stop armed for {trade_id} at {price} (entry {entry_price})");
            events.push(BracketEvent::TrailingArmed {
                trade_id: trade_id.clone(),
                price,
            });
        }

        let Some(candidate) = step.candidate else {
            return;
        };
        let policy = match direction {
            Direction::Long => TickPolicy::RoundDown,
            Direction::Short => TickPolicy::RoundUp,
        };
        let new_stop = self.instrument.round_price(candidate, policy);
        if !trailing.improves(new_stop) {
            return;
        }

        match self.executor.amend(&symbol, &stop_loss.order_id, new_stop) {
            Ok(_) => {
                let from = stop_loss.price;
                stop_loss.price = trailing.commit(new_stop);
                info!("{symbol}: {trade_id} stop trailed {from} → {}", stop_loss.price);
                events.push(BracketEvent::StopTrailed {
                    trade_id,
                    from,
                    to: stop_loss.price,
                });
            }
            Err(e) => warn!("{symbol}: trailing amend for {trade_id} failed, stop stays at {}: {e}", stop_loss.price),
        }
    }

    // ── Closing ──

    fn force_close(
        &self,
        bracket: &mut Bracket,
        reason: ExitReason,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) {
        if bracket.is_pending() {
            if let Err(e) = self.cancel_pending(bracket, CancelReason::ForceClosed, now, events) {
                warn!(
                    "{}: could not cancel entry {}: {e}",
                    bracket.symbol, bracket.trade_id
                );
                return;
            }
        }

        match bracket.phase {
            BracketPhase::Filled {
                entry_price,
                filled_at,
                exit,
                ..
            } => {
                // an exit already owed keeps its reason
                let pending = exit.unwrap_or(PendingExit { reason, tries: 0 });
                self.exit_position(bracket, entry_price, filled_at, pending, now, events);
            }
            BracketPhase::BracketPlaced {
                entry_price,
                filled_at,
                ref take_profit,
                ref stop_loss,
                ..
            } => {
                let (tp_id, sl_id) = (take_profit.order_id.clone(), stop_loss.order_id.clone());
                self.cancel_quietly(&bracket.symbol, &sl_id);
                self.cancel_quietly(&bracket.symbol, &tp_id);
                // a leg may have filled before the cancels landed
                if let Some((sl_order, tp_order)) = self.poll_legs(bracket) {
                    if self.close_if_leg_filled(bracket, &sl_order, &tp_order, now, events) {
                        return;
                    }
                }
                let pending = PendingExit { reason, tries: 0 };
                self.exit_position(bracket, entry_price, filled_at, pending, now, events);
            }
            _ => {}
        }
    }

    /// Flatten the position and record the trade. If the exit does not go
    /// through, the bracket stays `Filled` owing the exit and the next
    /// advance tries again; the trade is never recorded while the exchange
    /// still holds the position.
    #[allow(clippy::too_many_arguments)]
    fn exit_position(
        &self,
        bracket: &mut Bracket,
        entry_price: f64,
        filled_at: DateTime<Utc>,
        pending: PendingExit,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) {
        match self.flatten(bracket, pending.tries, entry_price) {
            Ok(exit_price) => self.close(
                bracket,
                entry_price,
                filled_at,
                exit_price,
                pending.reason,
                now,
                events,
            ),
            Err(e) => {
                let tries = pending.tries + 1;
                let message = format!(
                    "{} {} position of {} could not be flattened ({e}), still open after {tries} tries",
                    bracket.symbol, bracket.direction, bracket.qty
                );
                error!("{message}");
                events.push(BracketEvent::Critical {
                    trade_id: bracket.trade_id.clone(),
                    message,
                });
                bracket.phase = BracketPhase::Filled {
                    entry_price,
                    filled_at,
                    attempts: self.config.protection_attempts,
                    link_base: 0,
                    exit: Some(PendingExit {
                        reason: pending.reason,
                        tries,
                    }),
                };
            }
        }
    }

    /// Reduce-only market exit of the bracket's quantity. Returns the exit
    /// price (fill price, else mark, else `fallback`).
    ///
    /// After an earlier failed try the position is checked first: a lost
    /// response may hide a fill, whose price is then taken as the exit.
    fn flatten(&self, bracket: &Bracket, tries: u32, fallback: f64) -> Result<f64, ExecError> {
        let symbol = &bracket.symbol;
        let exit_price = |fill: Option<f64>| {
            fill.or_else(|| self.executor.mark_price(symbol).ok())
                .unwrap_or(fallback)
        };

        if tries > 0 && self.executor.position(symbol, bracket.direction)?.is_none() {
            let previous = LinkId::for_trade(&bracket.trade_id, LinkPurpose::Flatten(tries));
            let fill = self
                .executor
                .find_by_link(symbol, &previous)?
                .and_then(|order| order.avg_fill_price);
            info!("{symbol}: {} already flat on the exchange", bracket.trade_id);
            return Ok(exit_price(fill));
        }

        let link_id = LinkId::for_trade(&bracket.trade_id, LinkPurpose::Flatten(tries + 1));
        let request = OrderRequest::exit(
            symbol,
            bracket.direction,
            OrderKind::Market,
            bracket.qty,
            link_id,
        );
        let order = self.executor.submit(&request)?.value;
        Ok(exit_price(order.avg_fill_price))
    }

    #[allow(clippy::too_many_arguments)]
    fn close(
        &self,
        bracket: &mut Bracket,
        entry_price: f64,
        opened_at: DateTime<Utc>,
        exit_price: f64,
        reason: ExitReason,
        now: DateTime<Utc>,
        events: &mut Vec<BracketEvent>,
    ) {
        let fees = &self.config.fees;
        let entry_rate = match bracket.signal.entry_mode {
            EntryMode::Market => fees.taker,
            EntryMode::Limit => fees.maker,
        };
        let exit_rate = match reason {
            ExitReason::TakeProfit => fees.maker,
            _ => fees.taker,
        };

        let qty = bracket.qty;
        let gross_pnl = TradeRecord::gross(bracket.direction, entry_price, exit_price, qty);
        let fee_total = qty * (entry_price * entry_rate + exit_price * exit_rate);
        let record = TradeRecord {
            trade_id: bracket.trade_id.clone(),
            symbol: bracket.symbol.clone(),
            direction: bracket.direction,
            signal_bar: bracket.signal.bar_time,
            opened_at,
            entry_price,
            closed_at: now,
            exit_price,
            exit_reason: reason,
            quantity: qty,
            gross_pnl,
            fees: fee_total,
            net_pnl: gross_pnl - fee_total,
        };

        info!(
            "{}: {} {} closed ({reason}) {} → {}, net {:.4}",
            bracket.symbol, bracket.direction, bracket.trade_id, entry_price, exit_price, record.net_pnl
        );
        bracket.phase = BracketPhase::Closed {
            record: record.clone(),
        };
        events.push(BracketEvent::TradeClosed(record));
    }
}

fn skipped(signal: &Signal, reason: SkipReason) -> BracketEvent {
    BracketEvent::SignalSkipped {
        symbol: signal.symbol.clone(),
        direction: signal.direction,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn btc() -> Instrument {
        Instrument::new("BTCUSDT", 0.1, 0.001, 0.001)
    }

    #[test]
    fn test_long_bracket_prices() {
        let (tp, sl) = bracket_prices(
            Direction::Long,
            100_000.0,
            50.0,
            &BracketConfig::default(),
            &btc(),
        );
        assert_eq!(tp, 100_200.0);
        assert_eq!(sl, 99_900.0);
    }

    #[test]
    fn test_short_bracket_prices_are_mirrored() {
        let (tp, sl) = bracket_prices(
            Direction::Short,
            100_000.0,
            50.0,
            &BracketConfig::default(),
            &btc(),
        );
        assert_eq!(tp, 99_800.0);
        assert_eq!(sl, 100_100.0);
    }

    #[test]
    fn test_take_profit_rounds_toward_entry() {
        // 100 + 4 * 0.033 = 100.132 → 100.1 for a long, 99.868 → 99.9 for a short
        let (tp_long, _) =
            bracket_prices(Direction::Long, 100.0, 0.033, &BracketConfig::default(), &btc());
        let (tp_short, _) =
            bracket_prices(Direction::Short, 100.0, 0.033, &BracketConfig::default(), &btc());
        assert_eq!(tp_long, 100.1);
        assert_eq!(tp_short, 99.9);
    }
}
