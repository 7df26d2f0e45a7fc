use rust_decimal::Decimal;
use thiserror::Error;

use crate::{instrument::InstrumentKey, trade::Way};

/// Precondition violations caught before an event is folded into a state.
///
/// A call that returns one of these leaves the state exactly as it was.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchingError {
    #[error("trade {trade_id}: quantity must be greater than zero")]
    InvalidQuantity { trade_id: String },

    #[error("trade {trade_id}: price {price} must be positive")]
    InvalidPrice { trade_id: String, price: Decimal },

    #[error("closing price {0} must not be negative")]
    InvalidClosingPrice(Decimal),

    #[error("{way} trade on {ticker} has no identifier")]
    MissingIdentifier { ticker: String, way: Way },

    #[error("trade for {got} sent to the {expected} state")]
    TickerMismatch { expected: String, got: String },

    #[error("{key} is closed, trade {trade_id} arrived after end of stream")]
    PostCloseEvent { key: InstrumentKey, trade_id: String },

    #[error("{key}: buy and sell queues cannot both hold resting trades")]
    CrossedQueues { key: InstrumentKey },

    #[error("trade {trade_id} is a {way} and cannot rest on the other side")]
    WrongQueue { trade_id: String, way: Way },
}

/// Errors from the ingestion side: reading the feed and routing it to workers.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid instrument key `{0}`")]
    BadKey(String),

    #[error("worker for {0} is no longer running")]
    WorkerGone(InstrumentKey),

    #[error(transparent)]
    Matching(#[from] MatchingError),
}

pub type FeedResult<T> = Result<T, FeedError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_error_display() {
        let err = MatchingError::InvalidQuantity {
            trade_id: "42".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "trade 42: quantity must be greater than zero"
        );
    }

    #[test]
    fn test_post_close_names_key() {
        let err = MatchingError::PostCloseEvent {
            key: InstrumentKey::new("desk-a", "HSBC"),
            trade_id: "9".to_string(),
        };
        assert!(err.to_string().contains("desk-a/HSBC"));
    }

    #[test]
    fn test_feed_error_from_matching_error() {
        let err: FeedError = MatchingError::InvalidClosingPrice(Decimal::NEGATIVE_ONE).into();
        assert!(matches!(err, FeedError::Matching(_)));
    }
}
