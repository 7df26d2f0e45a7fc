//! JSON-lines feed of trade events.
//!
//! One record per line; blank lines and lines starting with `#` are skipped.
//!
//! ```text
//! {"type":"trade","account_group":"desk-a","trade":{"id":"1","ticker":"HSBC","way":"Buy","price":"1.0","quantity":10}}
//! {"type":"end_of_stream","account_group":"desk-a","ticker":"HSBC","closing_price":"0.95"}
//! ```
//!
//! `account_group` may be left out, in which case the default group is used.

use std::io::BufRead;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    errors::{FeedError, FeedResult},
    instrument::{AccountGroup, InstrumentKey},
    trade::{Trade, TradeEvent},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedRecord {
    Trade {
        #[serde(default)]
        account_group: AccountGroup,
        trade: Trade,
    },
    EndOfStream {
        #[serde(default)]
        account_group: AccountGroup,
        ticker: String,
        closing_price: Decimal,
    },
}

impl FeedRecord {
    /// The state this record must be folded into.
    pub fn key(&self) -> InstrumentKey {
        match self {
            FeedRecord::Trade {
                account_group,
                trade,
            } => InstrumentKey {
                account_group: account_group.clone(),
                ticker: trade.ticker.clone(),
            },
            FeedRecord::EndOfStream {
                account_group,
                ticker,
                ..
            } => InstrumentKey {
                account_group: account_group.clone(),
                ticker: ticker.clone(),
            },
        }
    }

    pub fn into_event(self) -> TradeEvent {
        match self {
            FeedRecord::Trade { trade, .. } => TradeEvent::NewTrade(trade),
            FeedRecord::EndOfStream { closing_price, .. } => {
                TradeEvent::EndOfStream { closing_price }
            }
        }
    }

    /// Splits the record into its routing key and the event itself.
    pub fn into_keyed(self) -> (InstrumentKey, TradeEvent) {
        let key = self.key();
        (key, self.into_event())
    }
}

/// Parses one feed line. `Ok(None)` for blank and comment lines.
pub fn parse_line(line_no: usize, raw: &str) -> FeedResult<Option<FeedRecord>> {
    let line = raw.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let record: FeedRecord = serde_json::from_str(line).map_err(|source| FeedError::Parse {
        line: line_no,
        source,
    })?;
    // keys must survive a round trip through their string form
    record.key().check()?;
    Ok(Some(record))
}

/// Iterates the records of a feed in order. Line numbers start at 1.
pub fn read_feed<R: BufRead>(reader: R) -> impl Iterator<Item = FeedResult<FeedRecord>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(idx, line)| match line {
            Ok(raw) => parse_line(idx + 1, &raw).transpose(),
            Err(e) => Some(Err(FeedError::Io(e))),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::Way;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_trade_record() {
        let line = r#"{"type":"trade","account_group":"desk-a","trade":{"id":"1","ticker":"HSBC","way":"Buy","price":"1.25","quantity":10}}"#;

        let record = parse_line(1, line).unwrap().unwrap();

        assert_eq!(record.key(), InstrumentKey::new("desk-a", "HSBC"));
        assert_eq!(
            record.into_event(),
            TradeEvent::NewTrade(Trade::new("1", "HSBC", Way::Buy, dec!(1.25), 10))
        );
    }

    #[test]
    fn test_parse_end_of_stream_with_default_group() {
        let line = r#"{"type":"end_of_stream","ticker":"HSBC","closing_price":0.5}"#;

        let (key, event) = parse_line(3, line).unwrap().unwrap().into_keyed();

        assert_eq!(key, InstrumentKey::new("default", "HSBC"));
        assert_eq!(
            event,
            TradeEvent::EndOfStream {
                closing_price: dec!(0.5)
            }
        );
    }

    #[test]
    fn test_skip_blank_and_comment_lines() {
        assert!(parse_line(1, "   ").unwrap().is_none());
        assert!(parse_line(2, "# header").unwrap().is_none());
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = parse_line(7, r#"{"type":"cancel"}"#).unwrap_err();
        assert!(matches!(err, FeedError::Parse { line: 7, .. }));
    }

    #[test]
    fn test_trade_without_id_still_parses() {
        let line = r#"{"type":"trade","trade":{"ticker":"HSBC","way":"S","price":"2","quantity":1}}"#;
        let record = parse_line(1, line).unwrap().unwrap();
        match record {
            FeedRecord::Trade { trade, .. } => assert!(trade.id.is_none()),
            other => panic!("unexpected record {other:?}"),
        }
    }

    #[test]
    fn test_separator_in_key_parts_is_rejected() {
        let bad_ticker = r#"{"type":"end_of_stream","ticker":"HSBC/L","closing_price":"1"}"#;
        let bad_group = r#"{"type":"trade","account_group":"desk/a","trade":{"id":"1","ticker":"HSBC","way":"B","price":"1","quantity":1}}"#;

        for line in [bad_ticker, bad_group] {
            let err = parse_line(1, line).unwrap_err();
            assert!(matches!(err, FeedError::BadKey(_)), "{err}");
        }
    }

    #[test]
    fn test_parsed_keys_round_trip_through_code() {
        let line = r#"{"type":"trade","account_group":"desk-a","trade":{"id":"1","ticker":"HSBC.L","way":"B","price":"1","quantity":1}}"#;
        let key = parse_line(1, line).unwrap().unwrap().key();

        assert_eq!(key.code().parse::<InstrumentKey>().unwrap(), key);
    }
}
