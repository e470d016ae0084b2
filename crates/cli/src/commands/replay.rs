//! Replays a bar file through detector, selector, sizing and the order
//! lifecycle, filling against the paper broker.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use swing_trade_core::{
    AppConfig, BrokerGateway, PersistenceSink, RateLimitedBroker, RetryPolicy, TracingSink,
};
use swing_trade_data::{CsvSink, CsvStorage};
use swing_trade_options_manager::{
    spawn_monitor, OrderLifecycleManager, Position, RunSummary, SwingTrader,
};
use swing_trade_paper::{ChainSnapshot, PaperBroker, ReplayFeed};
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Bar CSV: timestamp,symbol,open,high,low,close,volume
    #[arg(long)]
    pub bars: PathBuf,

    /// Option chain snapshot JSON
    #[arg(long)]
    pub chain: PathBuf,

    /// Route paper orders through the broker rate limiter
    #[arg(long)]
    pub rate_limit: bool,

    /// Directory for structure and order CSVs (overrides persistence.output_dir)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct PositionReport {
    correlation_id: String,
    symbol: String,
    state: String,
    quantity: u32,
    entry_price: Option<Decimal>,
    stop_price: Option<Decimal>,
    target_price: Option<Decimal>,
}

impl From<&Position> for PositionReport {
    fn from(position: &Position) -> Self {
        Self {
            correlation_id: position.correlation_id.clone(),
            symbol: position.contract.symbol.clone(),
            state: position.state.to_string(),
            quantity: position.quantity,
            entry_price: position.entry_order.as_ref().and_then(|o| o.filled_price),
            stop_price: position.stop_price,
            target_price: position.target_price,
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplayReport {
    summary: RunSummary,
    paper_orders: usize,
    position: Option<PositionReport>,
}

pub async fn run(args: ReplayArgs, config: AppConfig) -> Result<()> {
    let symbol = config.underlying.symbol.clone();
    let bars = CsvStorage::read_bars(&args.bars, Some(&symbol))?;
    if bars.is_empty() {
        bail!("No {symbol} bars in {}", args.bars.display());
    }
    let chain = ChainSnapshot::load(&args.chain)?;
    info!(
        symbol = %symbol,
        bars = bars.len(),
        contracts = chain.contracts.len(),
        "Starting replay"
    );

    let paper = Arc::new(PaperBroker::new());
    let broker: Arc<dyn BrokerGateway> = if args.rate_limit {
        Arc::new(RateLimitedBroker::new(paper.clone(), &config.broker))
    } else {
        paper.clone()
    };

    let (sink, writer): (Arc<dyn PersistenceSink>, Option<JoinHandle<()>>) =
        if config.persistence.enabled {
            let dir = args
                .output_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.persistence.output_dir));
            let (sink, task) = CsvSink::spawn(dir)?;
            (Arc::new(sink), Some(task))
        } else {
            (Arc::new(TracingSink), None)
        };

    let manager = OrderLifecycleManager::new(
        broker,
        sink.clone(),
        RetryPolicy::from_config(&config.broker.retry),
        config.lifecycle.clone(),
    );
    let (handle, monitor) = spawn_monitor(
        manager,
        Duration::from_secs(config.lifecycle.poll_interval_secs),
    );

    let feed = ReplayFeed::new(&symbol, bars, chain)
        .with_broker(paper.clone())
        .with_tick_size(config.underlying.tick_size);
    let mut trader = SwingTrader::new(feed, &config, handle.clone(), sink).with_poll_on_bar(true);

    let finished = tokio::select! {
        result = trader.run() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let summary = match finished {
        Some(result) => result?,
        None => {
            warn!("Interrupted, cancelling open orders");
            let cancelled = handle.cancel_all().await?;
            info!(?cancelled, "Open orders cancelled");
            trader.summary().clone()
        }
    };

    let position = handle.snapshot().await?;
    handle.shutdown().await?;
    monitor.await.context("Position monitor panicked")?;
    drop(trader);
    if let Some(writer) = writer {
        writer.await.context("CSV writer panicked")?;
    }

    let report = ReplayReport {
        summary,
        paper_orders: paper.orders().len(),
        position: position.as_ref().map(PositionReport::from),
    };
    print_report(&report, args.json)
}

fn print_report(report: &ReplayReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let s = &report.summary;
    println!();
    println!("Replay summary");
    println!("  bars processed     {}", s.bars);
    println!("  bars rejected      {}", s.bars_rejected);
    println!("  pivots confirmed   {}", s.pivots_confirmed);
    println!("  structures armed   {}", s.structures_armed);
    println!("  invalidations      {}", s.invalidations);
    println!("  breakouts          {}", s.breakouts);
    println!("  signals abandoned  {}", s.signals_abandoned);
    println!("  entries submitted  {}", s.entries_submitted);
    println!("  paper orders       {}", report.paper_orders);

    match &report.position {
        Some(p) => {
            let show = |v: Option<Decimal>| v.map_or_else(|| "-".to_string(), |d| d.to_string());
            println!();
            println!("Position {}", p.correlation_id);
            println!("  contract  {}", p.symbol);
            println!("  state     {}", p.state);
            println!("  quantity  {}", p.quantity);
            println!("  entry     {}", show(p.entry_price));
            println!("  stop      {}", show(p.stop_price));
            println!("  target    {}", show(p.target_price));
        }
        None => println!("\nNo position opened"),
    }
    Ok(())
}
