use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::{
    errors::MatchingError,
    feed::FeedRecord,
    instrument::InstrumentKey,
    matching::InstrumentMatching,
    results::MatchingResult,
};

/// Every instrument state known to a single owner, keyed by [`InstrumentKey`].
///
/// States are created on the first event for a key and keep their full result
/// log. Events are folded strictly in the order [`dispatch`] is called.
///
/// [`dispatch`]: MatchingBook::dispatch
#[derive(Debug, Default)]
pub struct MatchingBook {
    states: BTreeMap<InstrumentKey, InstrumentMatching>,
}

impl MatchingBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes one record to its state and returns the results it emitted.
    pub fn dispatch(&mut self, record: FeedRecord) -> Result<Vec<MatchingResult>, MatchingError> {
        let (key, event) = record.into_keyed();
        let state = self.states.entry(key).or_insert_with_key(|key| {
            info!(%key, "new instrument state");
            InstrumentMatching::new(key.clone())
        });
        let outcome = state.handle(event).map(<[MatchingResult]>::to_vec);
        if let Err(e) = &outcome {
            warn!(key = %state.key(), error = %e, "rejected event");
        }
        outcome
    }

    pub fn get(&self, key: &InstrumentKey) -> Option<&InstrumentMatching> {
        self.states.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &InstrumentKey> {
        self.states.keys()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn into_states(self) -> BTreeMap<InstrumentKey, InstrumentMatching> {
        self.states
    }
}
