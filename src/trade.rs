use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::MatchingError;

/// Which way a trade goes.
///
/// # Intuition
/// - `Buy`: the trader wants to purchase the instrument. A resting buy waits in the
///   buy queue for a sell to come in.
/// - `Sell`: the trader wants to sell. A resting sell waits in the sell queue.
///
/// Unlike a price-level book, neither queue is sorted by price: the oldest resting
/// trade on the opposite side is always the next one to be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Way {
    #[serde(alias = "B", alias = "buy")]
    Buy,
    #[serde(alias = "S", alias = "sell")]
    Sell,
}

impl Way {
    /// The way a trade must go to match against this one.
    pub fn opposite(self) -> Way {
        match self {
            Way::Buy => Way::Sell,
            Way::Sell => Way::Buy,
        }
    }
}

impl std::fmt::Display for Way {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Way::Buy => f.write_str("B"),
            Way::Sell => f.write_str("S"),
        }
    }
}

/// One order for a single instrument.
///
/// - `id` may be absent on the wire, but a trade without one can never rest or be
///   referenced by a result.
/// - `quantity` is whatever is still unfilled; a partially matched trade keeps its
///   id and price and only its quantity shrinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    #[serde(default)]
    pub id: Option<String>,
    pub ticker: String,
    pub way: Way,
    pub price: Decimal,
    pub quantity: u64,
}

impl Trade {
    pub fn new(
        id: impl Into<String>,
        ticker: impl Into<String>,
        way: Way,
        price: Decimal,
        quantity: u64,
    ) -> Self {
        Trade {
            id: Some(id.into()),
            ticker: ticker.into(),
            way,
            price,
            quantity,
        }
    }

    /// Copy of this trade carrying a different remaining quantity.
    pub fn with_quantity(&self, quantity: u64) -> Self {
        Trade {
            quantity,
            ..self.clone()
        }
    }

    /// The identifier, or [`MatchingError::MissingIdentifier`] if there is none.
    pub fn require_id(&self) -> Result<&str, MatchingError> {
        self.id
            .as_deref()
            .ok_or_else(|| MatchingError::MissingIdentifier {
                ticker: self.ticker.clone(),
                way: self.way,
            })
    }

    /// Checks everything a trade must satisfy before it may rest in a queue.
    pub fn validate(&self) -> Result<(), MatchingError> {
        let id = self.require_id()?;
        if self.quantity == 0 {
            return Err(MatchingError::InvalidQuantity {
                trade_id: id.to_string(),
            });
        }
        if self.price <= Decimal::ZERO {
            return Err(MatchingError::InvalidPrice {
                trade_id: id.to_string(),
                price: self.price,
            });
        }
        Ok(())
    }
}

/// An event folded into an instrument's matching state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeEvent {
    /// A new order arrives.
    NewTrade(Trade),
    /// The stream for the instrument has ended; whatever still rests is valued at
    /// `closing_price`.
    EndOfStream { closing_price: Decimal },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_opposite_way() {
        assert_eq!(Way::Buy.opposite(), Way::Sell);
        assert_eq!(Way::Sell.opposite(), Way::Buy);
    }

    #[test]
    fn test_way_accepts_short_codes() {
        let b: Way = serde_json::from_str("\"B\"").unwrap();
        let s: Way = serde_json::from_str("\"Sell\"").unwrap();
        assert_eq!(b, Way::Buy);
        assert_eq!(s, Way::Sell);
        assert!(serde_json::from_str::<Way>("\"X\"").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_quantity() {
        let t = Trade::new("1", "HSBC", Way::Buy, dec!(1.0), 0);
        assert!(matches!(
            t.validate(),
            Err(MatchingError::InvalidQuantity { trade_id }) if trade_id == "1"
        ));
    }

    #[test]
    fn test_validate_rejects_missing_id() {
        let mut t = Trade::new("1", "HSBC", Way::Sell, dec!(1.0), 5);
        t.id = None;
        assert!(matches!(
            t.validate(),
            Err(MatchingError::MissingIdentifier { way: Way::Sell, .. })
        ));
    }

    #[test]
    fn test_validate_rejects_non_positive_price() {
        let t = Trade::new("1", "HSBC", Way::Buy, dec!(0), 5);
        assert!(matches!(t.validate(), Err(MatchingError::InvalidPrice { .. })));
    }

    #[test]
    fn test_with_quantity_keeps_identity() {
        let t = Trade::new("7", "HSBC", Way::Buy, dec!(2.5), 10);
        let rest = t.with_quantity(3);
        assert_eq!(rest.id.as_deref(), Some("7"));
        assert_eq!(rest.price, dec!(2.5));
        assert_eq!(rest.quantity, 3);
    }
}
