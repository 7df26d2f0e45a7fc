use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    errors::MatchingError,
    instrument::AccountGroup,
    trade::{Trade, Way},
};

/// One fill between a buy and a sell.
///
/// Each side keeps the price it was submitted at; there is no clearing price.
/// Which of the two trades was resting and which was incoming does not show up here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedResult {
    pub buy_trade_id: String,
    pub buy_price: Decimal,
    pub sell_trade_id: String,
    pub sell_price: Decimal,
    pub quantity: u64,
    pub account_group: AccountGroup,
}

impl MatchedResult {
    /// Fill `quantity` between two trades of opposite ways, in either order.
    pub(crate) fn between(
        a: &Trade,
        b: &Trade,
        quantity: u64,
        account_group: &AccountGroup,
    ) -> Result<Self, MatchingError> {
        let (buy, sell) = match a.way {
            Way::Buy => (a, b),
            Way::Sell => (b, a),
        };
        debug_assert_eq!(buy.way, Way::Buy);
        debug_assert_eq!(sell.way, Way::Sell);
        Ok(MatchedResult {
            buy_trade_id: buy.require_id()?.to_string(),
            buy_price: buy.price,
            sell_trade_id: sell.require_id()?.to_string(),
            sell_price: sell.price,
            quantity,
            account_group: account_group.clone(),
        })
    }
}

/// Quantity still resting when the stream ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedResult {
    pub trade_id: String,
    pub way: Way,
    pub original_price: Decimal,
    pub closing_price: Decimal,
    pub quantity: u64,
    pub account_group: AccountGroup,
}

impl UnmatchedResult {
    pub(crate) fn residual(
        trade: &Trade,
        closing_price: Decimal,
        account_group: &AccountGroup,
    ) -> Result<Self, MatchingError> {
        Ok(UnmatchedResult {
            trade_id: trade.require_id()?.to_string(),
            way: trade.way,
            original_price: trade.price,
            closing_price,
            quantity: trade.quantity,
            account_group: account_group.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchingResult {
    Matched(MatchedResult),
    Unmatched(UnmatchedResult),
}

impl MatchingResult {
    pub fn quantity(&self) -> u64 {
        match self {
            MatchingResult::Matched(m) => m.quantity,
            MatchingResult::Unmatched(u) => u.quantity,
        }
    }
}

impl From<MatchedResult> for MatchingResult {
    fn from(m: MatchedResult) -> Self {
        MatchingResult::Matched(m)
    }
}

impl From<UnmatchedResult> for MatchingResult {
    fn from(u: UnmatchedResult) -> Self {
        MatchingResult::Unmatched(u)
    }
}
