use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    errors::MatchingError,
    instrument::{AccountGroup, InstrumentKey},
    results::{MatchedResult, MatchingResult, UnmatchedResult},
    trade::{Trade, TradeEvent, Way},
};

/// Where an instrument is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing resting.
    Empty,
    /// Unfilled quantity rests on exactly one side.
    Resting(Way),
    /// End of stream has been seen. Terminal.
    Closed,
}

/// Matching state for one instrument within one account group.
///
/// Resting trades are kept in two FIFO queues, one per [`Way`]. Arrival order is
/// the only priority: an incoming trade always eats into the **oldest** resting
/// trade on the other side first, whatever its price.
///
/// After every event at most one of the queues holds trades. An incoming trade
/// keeps matching until either it or the opposite queue runs out, so only the
/// leftover of one side can be left resting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstrumentMatching {
    key: InstrumentKey,
    buy_trades: VecDeque<Trade>,
    sell_trades: VecDeque<Trade>,
    results: Vec<MatchingResult>,
    closed: bool,
}

/// Accumulator threaded through the fold over the opposite queue.
///
/// - `remaining`: unfilled quantity of the incoming trade.
/// - `survivors`: opposite trades still resting after the fold, in arrival order.
/// - `results`: fills emitted so far, in fold order.
#[derive(Debug)]
struct MatchInProgress {
    remaining: u64,
    survivors: VecDeque<Trade>,
    results: Vec<MatchingResult>,
}

impl MatchInProgress {
    fn new(quantity: u64) -> Self {
        MatchInProgress {
            remaining: quantity,
            survivors: VecDeque::new(),
            results: Vec::new(),
        }
    }

    /// Advances the fold by one resting trade.
    fn step(
        mut self,
        incoming: &Trade,
        resting: &Trade,
        account_group: &AccountGroup,
    ) -> Result<Self, MatchingError> {
        if self.remaining == 0 {
            // incoming is filled, the rest of the queue keeps its place
            self.survivors.push_back(resting.clone());
        } else if self.remaining >= resting.quantity {
            let fill = MatchedResult::between(incoming, resting, resting.quantity, account_group)?;
            self.results.push(fill.into());
            self.remaining -= resting.quantity;
        } else {
            let fill = MatchedResult::between(incoming, resting, self.remaining, account_group)?;
            self.results.push(fill.into());
            self.survivors
                .push_back(resting.with_quantity(resting.quantity - self.remaining));
            self.remaining = 0;
        }
        Ok(self)
    }

    fn matched_quantity(&self) -> u128 {
        self.results.iter().map(|r| u128::from(r.quantity())).sum()
    }
}

/// Summed in `u128`: a queue of valid `u64` quantities can exceed `u64::MAX`.
fn total_quantity<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> u128 {
    trades.into_iter().map(|t| u128::from(t.quantity)).sum()
}

impl InstrumentMatching {
    /// Creates a new, empty state for `key`: no resting trades, no results.
    pub fn new(key: InstrumentKey) -> Self {
        InstrumentMatching {
            key,
            buy_trades: VecDeque::new(),
            sell_trades: VecDeque::new(),
            results: Vec::new(),
            closed: false,
        }
    }

    /// Seeds a state with trades that are already resting, e.g. restored from a
    /// snapshot. Every trade must be valid, belong to this instrument and sit on
    /// the queue of its own way, and at most one side may be populated.
    pub fn with_resting(
        key: InstrumentKey,
        buy_trades: impl IntoIterator<Item = Trade>,
        sell_trades: impl IntoIterator<Item = Trade>,
    ) -> Result<Self, MatchingError> {
        let mut state = InstrumentMatching::new(key);
        state.buy_trades = buy_trades.into_iter().collect();
        state.sell_trades = sell_trades.into_iter().collect();

        for (queue, way) in [(&state.buy_trades, Way::Buy), (&state.sell_trades, Way::Sell)] {
            for trade in queue {
                trade.validate()?;
                state.check_ticker(trade)?;
                if trade.way != way {
                    return Err(MatchingError::WrongQueue {
                        trade_id: trade.require_id()?.to_string(),
                        way: trade.way,
                    });
                }
            }
        }
        if !state.buy_trades.is_empty() && !state.sell_trades.is_empty() {
            return Err(MatchingError::CrossedQueues { key: state.key });
        }
        Ok(state)
    }

    pub fn key(&self) -> &InstrumentKey {
        &self.key
    }

    pub fn buy_trades(&self) -> &VecDeque<Trade> {
        &self.buy_trades
    }

    pub fn sell_trades(&self) -> &VecDeque<Trade> {
        &self.sell_trades
    }

    /// Every result emitted since creation (or since the last [`take_results`]).
    ///
    /// [`take_results`]: InstrumentMatching::take_results
    pub fn results(&self) -> &[MatchingResult] {
        &self.results
    }

    /// Drains the result log, for callers that stream results out as they happen.
    pub fn take_results(&mut self) -> Vec<MatchingResult> {
        std::mem::take(&mut self.results)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn phase(&self) -> Phase {
        if self.closed {
            Phase::Closed
        } else if !self.buy_trades.is_empty() {
            Phase::Resting(Way::Buy)
        } else if !self.sell_trades.is_empty() {
            Phase::Resting(Way::Sell)
        } else {
            Phase::Empty
        }
    }

    /// Total unfilled quantity resting on one side.
    pub fn resting_quantity(&self, way: Way) -> u128 {
        match way {
            Way::Buy => total_quantity(&self.buy_trades),
            Way::Sell => total_quantity(&self.sell_trades),
        }
    }

    /// Folds one event into this state and returns the results that event emitted.
    ///
    /// All preconditions are checked before anything is touched: on `Err` the state
    /// is exactly what it was before the call.
    pub fn handle(&mut self, event: TradeEvent) -> Result<&[MatchingResult], MatchingError> {
        let before = self.results.len();
        match event {
            TradeEvent::NewTrade(trade) => self.handle_trade(trade)?,
            TradeEvent::EndOfStream { closing_price } => self.close(closing_price)?,
        }
        Ok(&self.results[before..])
    }

    fn check_ticker(&self, trade: &Trade) -> Result<(), MatchingError> {
        if trade.ticker != self.key.ticker {
            return Err(MatchingError::TickerMismatch {
                expected: self.key.ticker.clone(),
                got: trade.ticker.clone(),
            });
        }
        Ok(())
    }

    fn handle_trade(&mut self, trade: Trade) -> Result<(), MatchingError> {
        trade.validate()?;
        self.check_ticker(&trade)?;
        if self.closed {
            return Err(MatchingError::PostCloseEvent {
                key: self.key.clone(),
                trade_id: trade.require_id()?.to_string(),
            });
        }

        let (same_side, opposite) = match trade.way {
            Way::Buy => (&mut self.buy_trades, &mut self.sell_trades),
            Way::Sell => (&mut self.sell_trades, &mut self.buy_trades),
        };

        if opposite.is_empty() {
            debug!(key = %self.key, trade = ?trade.id, way = %trade.way, "resting trade");
            same_side.push_back(trade);
            return Ok(());
        }

        let opposite_before = total_quantity(opposite.iter());
        let done = opposite
            .iter()
            .try_fold(MatchInProgress::new(trade.quantity), |mip, resting| {
                mip.step(&trade, resting, &self.key.account_group)
            })?;

        debug_assert_eq!(
            2 * done.matched_quantity()
                + u128::from(done.remaining)
                + total_quantity(&done.survivors),
            u128::from(trade.quantity) + opposite_before,
            "quantity not conserved on {}",
            self.key
        );
        debug!(
            key = %self.key,
            trade = ?trade.id,
            fills = done.results.len(),
            remaining = done.remaining,
            "matched incoming trade"
        );

        *opposite = done.survivors;
        *same_side = if done.remaining > 0 {
            VecDeque::from([trade.with_quantity(done.remaining)])
        } else {
            VecDeque::new()
        };
        self.results.extend(done.results);
        Ok(())
    }

    fn close(&mut self, closing_price: Decimal) -> Result<(), MatchingError> {
        if closing_price < Decimal::ZERO {
            return Err(MatchingError::InvalidClosingPrice(closing_price));
        }
        // buys first, then sells, each in arrival order
        let residuals = self
            .buy_trades
            .iter()
            .chain(self.sell_trades.iter())
            .map(|t| {
                UnmatchedResult::residual(t, closing_price, &self.key.account_group)
                    .map(MatchingResult::from)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            key = %self.key,
            unmatched = residuals.len(),
            %closing_price,
            "end of stream"
        );
        self.buy_trades.clear();
        self.sell_trades.clear();
        self.closed = true;
        self.results.extend(residuals);
        Ok(())
    }
}

/// Pure form of [`InstrumentMatching::handle`]: returns the next state and leaves
/// `state` alone.
pub fn apply(
    state: &InstrumentMatching,
    event: TradeEvent,
) -> Result<InstrumentMatching, MatchingError> {
    let mut next = state.clone();
    next.handle(event)?;
    Ok(next)
}
