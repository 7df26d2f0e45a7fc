pub mod cli;
pub mod errors;
pub mod feed;
pub mod instrument;
pub mod matching;
pub mod partition;
pub mod results;
pub mod simulate;
pub mod state;
pub mod trade;
pub mod utils;

pub use errors::{FeedError, MatchingError};
pub use instrument::{AccountGroup, InstrumentKey};
pub use matching::{InstrumentMatching, Phase, apply};
pub use results::{MatchedResult, MatchingResult, UnmatchedResult};
pub use trade::{Trade, TradeEvent, Way};
