//! `adscout`: watches classified-ad listing sites and remembers new offers.

mod audit;
mod config;
mod ledger;

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use adscout_core::contact_scrubber;
use adscout_engine::{FsResourceStore, ReqwestFetcher, ScoutScheduler, SystemClock, UrlLoader};
use adscout_logging::{scout_info, scout_warn};
use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::audit::RonRunAudit;
use crate::ledger::FileOfferLedger;

const CACHE_DIR: &str = "cache";
const OFFERS_FILE: &str = "offers.txt";
const RUNS_DIR: &str = "runs";

#[derive(Parser, Debug)]
#[command(name = "adscout", version, about = "Scouts classified-ad listings for new offers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured scout in turn until interrupted
    Run {
        /// RON configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Mask e-mail addresses and links in text read from stdin
    Scrub {
        /// Replacement for every match; defaults to `[email]` and `[link]`
        #[arg(long)]
        replacement: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run { config } => run(&config).await,
        Command::Scrub { replacement } => scrub(replacement.as_deref()),
    }
}

async fn run(config_path: &Path) -> anyhow::Result<()> {
    let config = config::load(config_path)?;
    adscout_logging::initialize(
        config.log.destination.into(),
        config.log.level_filter()?,
        config.log.file.as_deref(),
    );
    scout_info!(
        "adscout {} starting with {} scouts, data in {:?}",
        env!("CARGO_PKG_VERSION"),
        config.scouts.len(),
        config.data_dir
    );
    if config.scouts.is_empty() {
        scout_warn!("No scouts configured; the scheduler will idle");
    }

    let clock = Arc::new(SystemClock);
    let store = FsResourceStore::open(config.data_dir.join(CACHE_DIR))
        .context("cannot open the page cache")?;
    let fetcher =
        ReqwestFetcher::new(config.fetch.to_settings()).context("cannot set up the http client")?;
    let loader = UrlLoader::new(Arc::new(store), Arc::new(fetcher), clock.clone());
    let ledger = Arc::new(
        FileOfferLedger::open(config.data_dir.join(OFFERS_FILE), loader)
            .context("cannot open the offer ledger")?,
    );
    let audit = Arc::new(
        RonRunAudit::open(config.data_dir.join(RUNS_DIR)).context("cannot open the run audit")?,
    );

    let scheduler = ScoutScheduler::new(
        config.scheduler.to_settings(),
        ledger.clone(),
        audit,
        clock,
        CancellationToken::new(),
    );
    for scout in &config.scouts {
        scheduler.add_scout(scout.id.clone(), scout.build()?)?;
    }

    #[cfg(unix)]
    reload_ledger_on_hangup(ledger.clone());

    let handle = scheduler.start()?;
    let stopper = scheduler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            scout_info!("Interrupted, finishing the current run");
            stopper.stop();
        }
    });
    handle.await.context("scheduler task panicked")?;

    scout_info!("Stopped; {} offers known", ledger.len());
    Ok(())
}

/// `kill -HUP` makes the ledger re-read offers edited outside the process.
#[cfg(unix)]
fn reload_ledger_on_hangup(ledger: Arc<FileOfferLedger>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangups = match signal(SignalKind::hangup()) {
            Ok(hangups) => hangups,
            Err(err) => {
                scout_warn!("Cannot listen for SIGHUP: {}", err);
                return;
            }
        };
        while hangups.recv().await.is_some() {
            match ledger.reload() {
                Ok(known) => scout_info!("Offer ledger reloaded, {} offers known", known),
                Err(err) => scout_warn!("Offer ledger reload failed: {}", err),
            }
        }
    });
}

fn scrub(replacement: Option<&str>) -> anyhow::Result<()> {
    let mut text = String::new();
    io::stdin()
        .read_to_string(&mut text)
        .context("cannot read stdin")?;
    let pipeline = match replacement {
        Some(r) => contact_scrubber(r, r),
        None => contact_scrubber("[email]", "[link]"),
    };
    let mut out = io::stdout().lock();
    out.write_all(pipeline.process(&text).as_bytes())?;
    out.flush()?;
    Ok(())
}
