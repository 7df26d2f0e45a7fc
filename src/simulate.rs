//! Simulation harness for the partitioned matcher.
//!
//! Generates a random trade stream over several account groups and tickers, runs
//! it through a [`Partitioner`] and checks that no quantity was created or lost.
//!
//! ## Components
//!
//! - `SimConfig` holds the simulation parameters:
//!   - `tickers` / `groups`: the stream covers every (group, ticker) pair.
//!   - `trades_per_key`: trades generated for each key before its end of stream.
//!   - `mean_qty`: each quantity is `1 + Exp1 * mean_qty`, a heavy-tailed size that is
//!     never zero.
//!   - `mid_price` / `price_sigma`: prices are drawn from `N(mid_price, price_sigma)`,
//!     rounded to cents and floored at one cent. `mid_price` is also the closing price.
//!   - `seed`: fixes the stream, ids included. `None` draws from the OS.
//! - `generate_feed(cfg)`: the stream, keys interleaved round-robin, one end of
//!   stream per key at the tail.
//! - `run_simulation(cfg, cancel_token)`: feeds the stream to the partitioner and
//!   tallies the results into a [`SimReport`]. Stops early once `cancel_token`
//!   fires (e.g. on Ctrl-C).
//!
//! Every matched unit consumes one unit of a buy and one of a sell, and every unit
//! left at end of stream is reported once, so a complete run satisfies
//! `submitted == 2 * matched + unmatched`.

use anyhow::{Context, ensure};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Exp1, Normal};
use rust_decimal::{Decimal, prelude::FromPrimitive};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    feed::FeedRecord,
    instrument::InstrumentKey,
    partition::{Emitted, PartitionConfig, Partitioner},
    results::MatchingResult,
    trade::{Trade, Way},
};

const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub tickers: usize,
    pub groups: usize,
    pub trades_per_key: usize,
    pub mean_qty: f64,
    pub mid_price: f64,
    pub price_sigma: f64,
    pub seed: Option<u64>,
    pub channel_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            tickers: 4,
            groups: 2,
            trades_per_key: 1_000,
            mean_qty: 10.0,
            mid_price: 100.0,
            price_sigma: 2.0,
            seed: None,
            channel_capacity: 1024,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SimReport {
    pub keys: usize,
    pub submitted: u128,
    pub matched: u128,
    pub unmatched: u128,
    pub rejected: usize,
    pub interrupted: bool,
}

impl SimReport {
    pub fn is_conserved(&self) -> bool {
        self.submitted == 2 * self.matched + self.unmatched
    }

    fn tally(&mut self, emitted: Emitted) {
        match emitted.outcome {
            Ok(results) => {
                for result in results {
                    match result {
                        MatchingResult::Matched(m) => self.matched += u128::from(m.quantity),
                        MatchingResult::Unmatched(u) => self.unmatched += u128::from(u.quantity),
                    }
                }
            }
            Err(_) => self.rejected += 1,
        }
    }
}

fn random_trade(
    rng: &mut StdRng,
    key: &InstrumentKey,
    prices: &Normal<f64>,
    mean_qty: f64,
) -> Trade {
    let way = if rng.random_bool(0.5) {
        Way::Buy
    } else {
        Way::Sell
    };
    let raw: f64 = <Exp1 as Distribution<f64>>::sample(&Exp1, rng);
    // the cast saturates, so a huge sample lands on u64::MAX
    let quantity = ((raw * mean_qty) as u64).saturating_add(1);
    let price = Decimal::from_f64(prices.sample(rng))
        .map(|p| p.round_dp(2))
        .filter(|p| *p >= MIN_PRICE)
        .unwrap_or(MIN_PRICE);
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    let id = uuid::Builder::from_random_bytes(bytes).into_uuid();
    Trade::new(id.to_string(), key.ticker.clone(), way, price, quantity)
}

/// Builds the whole random stream up front.
pub fn generate_feed(cfg: &SimConfig) -> anyhow::Result<Vec<FeedRecord>> {
    ensure!(
        cfg.mean_qty.is_finite() && cfg.mean_qty >= 0.0,
        "mean_qty must be finite and not negative"
    );
    ensure!(
        cfg.mid_price.is_finite() && cfg.mid_price > 0.0,
        "mid_price must be finite and positive"
    );
    let prices = Normal::new(cfg.mid_price, cfg.price_sigma)
        .context("price_sigma must be finite and >= 0")?;
    let closing_price = Decimal::from_f64(cfg.mid_price)
        .context("mid_price is not representable as a decimal")?
        .round_dp(2);

    let mut rng = match cfg.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let keys: Vec<InstrumentKey> = (0..cfg.groups)
        .flat_map(|g| {
            (0..cfg.tickers)
                .map(move |t| InstrumentKey::new(format!("group-{g}"), format!("SIM{t}")))
        })
        .collect();

    let mut feed = Vec::with_capacity(keys.len() * (cfg.trades_per_key + 1));
    for _ in 0..cfg.trades_per_key {
        for key in &keys {
            feed.push(FeedRecord::Trade {
                account_group: key.account_group.clone(),
                trade: random_trade(&mut rng, key, &prices, cfg.mean_qty),
            });
        }
    }
    for key in keys {
        feed.push(FeedRecord::EndOfStream {
            account_group: key.account_group,
            ticker: key.ticker,
            closing_price,
        });
    }
    Ok(feed)
}

/// Runs a generated stream through the partitioner.
///
/// # Errors
/// Returns an error if the configuration is invalid, a worker dies, or a complete
/// run does not conserve quantity.
pub async fn run_simulation(
    cfg: SimConfig,
    cancel_token: CancellationToken,
) -> anyhow::Result<SimReport> {
    let feed = generate_feed(&cfg)?;
    let submitted: u128 = feed
        .iter()
        .map(|record| match record {
            FeedRecord::Trade { trade, .. } => u128::from(trade.quantity),
            FeedRecord::EndOfStream { .. } => 0,
        })
        .sum();
    info!(events = feed.len(), submitted, "starting simulation");

    let (mut partitioner, mut emitted) = Partitioner::new(
        PartitionConfig {
            channel_capacity: cfg.channel_capacity,
        },
        cancel_token.clone(),
    );
    let collector = tokio::spawn(async move {
        let mut report = SimReport::default();
        while let Some(e) = emitted.recv().await {
            report.tally(e);
        }
        report
    });

    let mut interrupted = false;
    for record in feed {
        if cancel_token.is_cancelled() {
            interrupted = true;
            break;
        }
        if let Err(e) = partitioner.dispatch(record).await {
            if cancel_token.is_cancelled() {
                interrupted = true;
                break;
            }
            return Err(e.into());
        }
    }

    let states = partitioner.finish().await?;
    let mut report = collector.await.context("result collector panicked")?;
    report.keys = states.len();
    report.submitted = submitted;
    report.interrupted = interrupted || cancel_token.is_cancelled();

    info!(?report, "simulation finished");
    if !report.interrupted {
        ensure!(report.is_conserved(), "quantity not conserved: {report:?}");
    }
    Ok(report)
}
