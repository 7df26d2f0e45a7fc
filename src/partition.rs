//! One matching worker per instrument key.
//!
//! Matching is order dependent, so each key gets exactly one owner: a tokio task
//! fed through its own bounded channel. Channel order is arrival order, which
//! gives single-writer, in-order delivery per key while different keys run in
//! parallel without sharing anything.
//!
//! Workers stream results out as they are produced and drain their own log, so a
//! state returned by [`Partitioner::finish`] carries resting trades and phase but
//! no result history.

use std::collections::{BTreeMap, HashMap, hash_map::Entry};

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    errors::{FeedError, FeedResult, MatchingError},
    feed::FeedRecord,
    instrument::InstrumentKey,
    matching::InstrumentMatching,
    results::MatchingResult,
    trade::TradeEvent,
};

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Events buffered per key before `dispatch` waits on that key's worker.
    pub channel_capacity: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        PartitionConfig {
            channel_capacity: 1024,
        }
    }
}

/// What one event did to its key's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emitted {
    pub key: InstrumentKey,
    pub outcome: Result<Vec<MatchingResult>, MatchingError>,
}

struct Worker {
    events: mpsc::Sender<TradeEvent>,
    handle: JoinHandle<InstrumentMatching>,
}

pub struct Partitioner {
    config: PartitionConfig,
    workers: HashMap<InstrumentKey, Worker>,
    output: mpsc::UnboundedSender<Emitted>,
    cancel: CancellationToken,
}

impl Partitioner {
    /// Creates a partitioner and the receiving end of its result stream. Until
    /// `cancel` fires, every dispatched event produces exactly one [`Emitted`], in
    /// per-key order. Once cancelled, workers stop without draining their inbox,
    /// so events still queued there produce nothing.
    pub fn new(
        config: PartitionConfig,
        cancel: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Emitted>) {
        let (output, results) = mpsc::unbounded_channel();
        let partitioner = Partitioner {
            config,
            workers: HashMap::new(),
            output,
            cancel,
        };
        (partitioner, results)
    }

    /// Hands the record to the worker owning its key, spawning it on first use.
    pub async fn dispatch(&mut self, record: FeedRecord) -> FeedResult<()> {
        let (key, event) = record.into_keyed();
        let worker = match self.workers.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let worker = spawn_worker(
                    entry.key().clone(),
                    &self.config,
                    &self.output,
                    &self.cancel,
                );
                entry.insert(worker)
            }
        };
        worker
            .events
            .send(event)
            .await
            .map_err(|_| FeedError::WorkerGone(key))
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Closes every worker's input, waits for them to drain and returns the final
    /// state of each key.
    pub async fn finish(self) -> FeedResult<BTreeMap<InstrumentKey, InstrumentMatching>> {
        let workers: Vec<_> = self
            .workers
            .into_iter()
            .map(|(key, worker)| (key, worker.handle))
            .collect();

        let mut states = BTreeMap::new();
        for (key, handle) in workers {
            match handle.await {
                Ok(state) => {
                    states.insert(key, state);
                }
                Err(e) => {
                    error!(%key, error = %e, "matching worker failed");
                    return Err(FeedError::WorkerGone(key));
                }
            }
        }
        Ok(states)
    }
}

fn spawn_worker(
    key: InstrumentKey,
    config: &PartitionConfig,
    output: &mpsc::UnboundedSender<Emitted>,
    cancel: &CancellationToken,
) -> Worker {
    let capacity = config.channel_capacity.max(1);
    let (events, inbox) = mpsc::channel(capacity);
    info!(%key, capacity, "spawning matching worker");
    let handle = tokio::spawn(run_worker(key, inbox, output.clone(), cancel.clone()));
    Worker { events, handle }
}

async fn run_worker(
    key: InstrumentKey,
    mut inbox: mpsc::Receiver<TradeEvent>,
    output: mpsc::UnboundedSender<Emitted>,
    cancel: CancellationToken,
) -> InstrumentMatching {
    let mut state = InstrumentMatching::new(key);
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!(key = %state.key(), "matching worker cancelled");
                break;
            }
            event = inbox.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let outcome = state.handle(event).map(|_| ());
        let outcome = outcome.map(|()| state.take_results());
        if let Err(e) = &outcome {
            warn!(key = %state.key(), error = %e, "rejected event");
        }
        let emitted = Emitted {
            key: state.key().clone(),
            outcome,
        };
        if output.send(emitted).is_err() {
            warn!(key = %state.key(), "result stream closed, stopping worker");
            break;
        }
    }
    debug!(key = %state.key(), phase = ?state.phase(), "matching worker done");
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        instrument::AccountGroup,
        matching::Phase,
        trade::{Trade, Way},
    };
    use rust_decimal_macros::dec;

    fn trade(group: &str, id: &str, way: Way, quantity: u64) -> FeedRecord {
        FeedRecord::Trade {
            account_group: AccountGroup::new(group),
            trade: Trade::new(id, "HSBC", way, dec!(1.0), quantity),
        }
    }

    #[tokio::test]
    async fn test_one_worker_per_key() {
        let (mut partitioner, mut results) =
            Partitioner::new(PartitionConfig::default(), CancellationToken::new());

        partitioner.dispatch(trade("a", "1", Way::Buy, 4)).await.unwrap();
        partitioner.dispatch(trade("b", "2", Way::Sell, 4)).await.unwrap();
        partitioner.dispatch(trade("a", "3", Way::Sell, 3)).await.unwrap();
        assert_eq!(partitioner.len(), 2);

        let states = partitioner.finish().await.unwrap();

        let mut emitted = Vec::new();
        while let Some(e) = results.recv().await {
            emitted.push(e);
        }
        assert_eq!(emitted.len(), 3);
        let fills: Vec<_> = emitted
            .iter()
            .filter_map(|e| e.outcome.as_ref().ok())
            .flatten()
            .collect();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].quantity(), 3);

        let a = &states[&InstrumentKey::new("a", "HSBC")];
        assert_eq!(a.phase(), Phase::Resting(Way::Buy));
        assert_eq!(a.resting_quantity(Way::Buy), 1);
        assert!(a.results().is_empty());
    }

    #[tokio::test]
    async fn test_rejection_is_emitted_not_fatal() {
        let (mut partitioner, mut results) =
            Partitioner::new(PartitionConfig::default(), CancellationToken::new());

        partitioner.dispatch(trade("a", "1", Way::Buy, 0)).await.unwrap();
        partitioner.dispatch(trade("a", "2", Way::Buy, 2)).await.unwrap();
        let states = partitioner.finish().await.unwrap();

        let first = results.recv().await.unwrap();
        assert!(matches!(
            first.outcome,
            Err(MatchingError::InvalidQuantity { .. })
        ));
        let second = results.recv().await.unwrap();
        assert_eq!(second.outcome, Ok(vec![]));
        assert_eq!(
            states[&InstrumentKey::new("a", "HSBC")].resting_quantity(Way::Buy),
            2
        );
    }

    #[tokio::test]
    async fn test_cancelled_workers_stop_accepting() {
        let cancel = CancellationToken::new();
        let (mut partitioner, _results) = Partitioner::new(PartitionConfig::default(), cancel.clone());
        partitioner.dispatch(trade("a", "1", Way::Buy, 1)).await.unwrap();

        cancel.cancel();
        let states = partitioner.finish().await.unwrap();

        assert_eq!(states.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_may_drop_queued_events() {
        let cancel = CancellationToken::new();
        let (mut partitioner, mut results) =
            Partitioner::new(PartitionConfig::default(), cancel.clone());
        for id in ["1", "2", "3"] {
            partitioner.dispatch(trade("a", id, Way::Buy, 1)).await.unwrap();
        }

        cancel.cancel();
        let states = partitioner.finish().await.unwrap();

        let mut emitted = 0;
        while let Some(e) = results.recv().await {
            assert_eq!(e.outcome, Ok(vec![]));
            emitted += 1;
        }
        assert!(emitted <= 3);
        // whatever was emitted is exactly what the state absorbed
        assert_eq!(
            states[&InstrumentKey::new("a", "HSBC")].resting_quantity(Way::Buy),
            emitted
        );
    }
}
