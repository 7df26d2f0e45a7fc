use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::{Path, PathBuf},
};
use tokio::{sync::mpsc, task};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    errors::MatchingError,
    feed::read_feed,
    partition::{Emitted, PartitionConfig, Partitioner},
    results::MatchingResult,
    simulate::{SimConfig, run_simulation},
    state::MatchingBook,
    utils::shutdown_token,
};

/// FIFO matching of buy and sell trades, per account group and instrument
#[derive(Parser)]
#[command(name = "trade-matching")]
#[command(version, about = "Matches trade streams per instrument, oldest resting trade first")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a JSON-lines feed and print every result as a JSON line
    Match {
        /// Feed file (reads stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Run one worker task per instrument key
        #[arg(long)]
        parallel: bool,

        /// Events buffered per instrument worker (with --parallel)
        #[arg(long, env = "MATCHING_CHANNEL_CAPACITY", default_value_t = 1024)]
        capacity: usize,

        /// Abort on the first rejected event instead of skipping it
        #[arg(long)]
        fail_fast: bool,
    },

    /// Generate a random stream, match it and check quantity conservation
    Simulate {
        #[arg(long, default_value_t = 4)]
        tickers: usize,

        #[arg(long, default_value_t = 2)]
        groups: usize,

        /// Trades per (group, ticker)
        #[arg(long, default_value_t = 1_000)]
        trades: usize,

        #[arg(long, default_value_t = 10.0)]
        mean_qty: f64,

        /// Centre of the price distribution, also used as closing price
        #[arg(long, default_value_t = 100.0)]
        mid_price: f64,

        #[arg(long, default_value_t = 2.0)]
        sigma: f64,

        #[arg(long, env = "MATCHING_SIM_SEED")]
        seed: Option<u64>,
    },
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub events: usize,
    pub results: usize,
    pub rejected: usize,
}

impl RunSummary {
    /// Writes the results of one event and counts it.
    fn record<W: Write>(
        &mut self,
        out: &mut W,
        outcome: Result<Vec<MatchingResult>, MatchingError>,
        fail_fast: bool,
    ) -> anyhow::Result<()> {
        self.events += 1;
        match outcome {
            Ok(results) => {
                for result in &results {
                    serde_json::to_writer(&mut *out, result)?;
                    writeln!(out)?;
                }
                self.results += results.len();
                Ok(())
            }
            Err(e) if fail_fast => {
                Err(anyhow::Error::new(e).context(format!("event {} rejected", self.events)))
            }
            Err(_) => {
                self.rejected += 1;
                Ok(())
            }
        }
    }
}

fn open_input(path: Option<&Path>) -> anyhow::Result<Box<dyn BufRead + Send>> {
    match path {
        Some(path) => {
            let file =
                File::open(path).with_context(|| format!("opening feed {}", path.display()))?;
            Ok(Box::new(BufReader::new(file)))
        }
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

/// Folds the feed through a single [`MatchingBook`], in feed order.
pub fn run_sequential<R: BufRead, W: Write>(
    reader: R,
    out: &mut W,
    fail_fast: bool,
) -> anyhow::Result<RunSummary> {
    let mut book = MatchingBook::new();
    let mut summary = RunSummary::default();
    for record in read_feed(reader) {
        summary.record(out, book.dispatch(record?), fail_fast)?;
    }
    info!(instruments = book.len(), "feed exhausted");
    Ok(summary)
}

/// Same as [`run_sequential`] but with one worker per key. Results of different keys
/// may interleave differently than the feed; per key the order is preserved.
///
/// The feed is read and the results are written on blocking threads, so slow
/// input or output never stalls the workers' runtime threads.
pub async fn run_parallel<R, W>(
    reader: R,
    out: W,
    config: PartitionConfig,
    fail_fast: bool,
    cancel: CancellationToken,
) -> anyhow::Result<RunSummary>
where
    R: BufRead + Send + 'static,
    W: Write + Send + 'static,
{
    let (records_tx, mut records) = mpsc::channel(config.channel_capacity.max(1));
    let (mut partitioner, mut emitted) = Partitioner::new(config, cancel.clone());

    task::spawn_blocking(move || {
        for record in read_feed(reader) {
            let failed = record.is_err();
            if records_tx.blocking_send(record).is_err() || failed {
                break;
            }
        }
    });

    let writer = task::spawn_blocking({
        let cancel = cancel.clone();
        move || -> anyhow::Result<RunSummary> {
            let mut out = out;
            let mut summary = RunSummary::default();
            while let Some(Emitted { outcome, .. }) = emitted.blocking_recv() {
                if let Err(e) = summary.record(&mut out, outcome, fail_fast) {
                    cancel.cancel();
                    return Err(e);
                }
            }
            out.flush()?;
            Ok(summary)
        }
    });

    while let Some(record) = records.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = partitioner.dispatch(record?).await {
            if cancel.is_cancelled() {
                break;
            }
            return Err(e.into());
        }
    }
    drop(records);

    let states = partitioner.finish().await?;
    info!(instruments = states.len(), "feed exhausted");
    writer.await.context("result writer panicked")?
}

pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Match {
            input,
            parallel,
            capacity,
            fail_fast,
        } => {
            let reader = open_input(input.as_deref())?;
            let summary = if parallel {
                run_parallel(
                    reader,
                    io::stdout(),
                    PartitionConfig {
                        channel_capacity: capacity,
                    },
                    fail_fast,
                    shutdown_token(),
                )
                .await?
            } else {
                run_sequential(reader, &mut io::stdout().lock(), fail_fast)?
            };
            info!(
                events = summary.events,
                results = summary.results,
                rejected = summary.rejected,
                "matching done"
            );
        }
        Commands::Simulate {
            tickers,
            groups,
            trades,
            mean_qty,
            mid_price,
            sigma,
            seed,
        } => {
            let cfg = SimConfig {
                tickers,
                groups,
                trades_per_key: trades,
                mean_qty,
                mid_price,
                price_sigma: sigma,
                seed,
                ..SimConfig::default()
            };
            let report = run_simulation(cfg, shutdown_token()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const FEED: &str = r#"
# one instrument, one group
{"type":"trade","account_group":"g","trade":{"id":"1","ticker":"HSBC","way":"Buy","price":"1.0","quantity":2}}
{"type":"trade","account_group":"g","trade":{"id":"2","ticker":"HSBC","way":"Buy","price":"2.0","quantity":3}}
{"type":"trade","account_group":"g","trade":{"id":"3","ticker":"HSBC","way":"Sell","price":"1.5","quantity":3}}
{"type":"trade","account_group":"g","trade":{"id":"4","ticker":"HSBC","way":"Sell","price":"1.5","quantity":0}}
{"type":"end_of_stream","account_group":"g","ticker":"HSBC","closing_price":"0.0"}
"#;

    #[test]
    fn test_sequential_run_writes_json_lines() {
        let mut out = Vec::new();

        let summary = run_sequential(Cursor::new(FEED), &mut out, false).unwrap();

        assert_eq!(
            summary,
            RunSummary {
                events: 5,
                results: 3,
                rejected: 1
            }
        );
        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["kind"], "matched");
        assert_eq!(lines[0]["buy_trade_id"], "1");
        assert_eq!(lines[1]["buy_trade_id"], "2");
        assert_eq!(lines[2]["kind"], "unmatched");
        assert_eq!(lines[2]["trade_id"], "2");
        assert_eq!(lines[2]["quantity"], 2);
    }

    #[test]
    fn test_fail_fast_stops_on_rejection() {
        let mut out = Vec::new();
        let err = run_sequential(Cursor::new(FEED), &mut out, true).unwrap_err();
        assert!(err.to_string().contains("event 4"), "{err:#}");
    }

    #[test]
    fn test_malformed_line_is_an_error() {
        let mut out = Vec::new();
        let res = run_sequential(Cursor::new("{not json}\n"), &mut out, false);
        assert!(res.is_err());
    }

    fn read_back(mut file: File) -> Vec<serde_json::Value> {
        use std::io::{Read, Seek};
        let mut text = String::new();
        file.rewind().unwrap();
        file.read_to_string(&mut text).unwrap();
        text.lines().map(|l| serde_json::from_str(l).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_parallel_run_reads_and_writes_off_the_runtime() {
        let file = tempfile::tempfile().unwrap();
        let out = file.try_clone().unwrap();

        let summary = run_parallel(
            Cursor::new(FEED),
            out,
            PartitionConfig { channel_capacity: 1 },
            false,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                events: 5,
                results: 3,
                rejected: 1
            }
        );
        let lines = read_back(file);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["buy_trade_id"], "1");
        assert_eq!(lines[2]["kind"], "unmatched");
    }

    #[tokio::test]
    async fn test_parallel_run_surfaces_parse_errors() {
        let res = run_parallel(
            Cursor::new("{not json}\n"),
            io::sink(),
            PartitionConfig::default(),
            false,
            CancellationToken::new(),
        )
        .await;

        assert!(res.is_err());
    }
}
