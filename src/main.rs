use std::process::exit;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use tracing::{error, info, warn};

use phit_filter::{
    ClassifierConfig, ControlPlane, ControlRegisters, FilterConfig, KeyEndpoint, RuleTable,
    SharedRuleTable, StatsCounters, dispatch, logging,
};

const MAIN_TICK: Duration = Duration::from_millis(50);

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "phit-filter")]
#[command(about = "Chunk-streaming UDP allow-list filter on NFQUEUE", long_about = None)]
struct Cli {
    /// First NFQUEUE number; worker i binds queue_base + i
    #[arg(short = 'q', long, default_value_t = 0)]
    queue_base: u16,
    /// Number of worker threads (one NFQUEUE each)
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    workers: usize,
    /// Seconds to run; 0 runs until SIGINT/SIGTERM
    #[arg(short = 'd', long, default_value_t = 10)]
    duration: u64,
    /// Comma-separated allow list, e.g. 10.0.0.5:9000,10.0.0.6:53
    #[arg(short = 'f', long = "filter", value_name = "IP:PORT,...")]
    filter: Option<String>,
    /// Bytes per chunk (1..=64)
    #[arg(short = 'w', long, default_value_t = 64)]
    chunk_width: usize,
    /// Which endpoint keys the rule lookup
    #[arg(long, value_name = "src|dst", default_value_t = KeyEndpoint::Destination)]
    key_endpoint: KeyEndpoint,
    /// Disable packet counters
    #[arg(long = "no-stats", action = ArgAction::SetTrue)]
    no_stats: bool,
    /// Seconds between live statistics reports; 0 disables them
    #[arg(long, default_value_t = 1)]
    report_interval: u64,
    /// Rule table slots (power of two)
    #[arg(long, default_value_t = phit_filter::rule_table::DEFAULT_CAPACITY)]
    table_capacity: usize,
}

impl Cli {
    fn into_config(self) -> Result<FilterConfig> {
        let classifier = ClassifierConfig::new(self.chunk_width, self.key_endpoint, !self.no_stats)?;
        let rules = match self.filter.as_deref() {
            Some(list) => FilterConfig::parse_rule_list(list)?,
            None => Vec::new(),
        };

        let config = FilterConfig {
            queue_base: self.queue_base,
            workers: self.workers,
            duration: Duration::from_secs(self.duration),
            rules,
            classifier,
            table_capacity: self.table_capacity,
            report_interval: Duration::from_secs(self.report_interval),
            ..FilterConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

extern "C" fn on_signal(_: libc::c_int) {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

fn install_signal_handlers() -> Result<()> {
    for sig in [libc::SIGINT, libc::SIGTERM] {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        let prev = unsafe { libc::signal(sig, handler) };
        if prev == libc::SIG_ERR {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("failed to install handler for signal {sig}"));
        }
    }
    Ok(())
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        error!("{err:#}");
        eprintln!("phit-filter error: {err:?}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let config = Cli::parse().into_config().context("invalid configuration")?;
    info!(
        workers = config.workers,
        queue_base = config.queue_base,
        chunk_width = config.classifier.chunk_width.bytes(),
        key_endpoint = %config.classifier.key_endpoint,
        rules = config.rules.len(),
        "starting filter"
    );

    install_signal_handlers()?;

    let stats = Arc::new(StatsCounters::new());
    let registers = Arc::new(ControlRegisters::new(stats.clone()));
    let table = Arc::new(SharedRuleTable::new(RuleTable::with_capacity(
        config.table_capacity,
    )?));
    let running = Arc::new(AtomicBool::new(true));

    let handles = dispatch::spawn_workers(
        &config,
        table,
        registers.clone(),
        stats,
        running.clone(),
    )?;

    let plane = ControlPlane::new(registers, config.ack_timeout);
    let outcome = plane
        .install_rules(&config.rules)
        .context("failed to install rule list")
        .map(|()| serve(&plane, &config));

    running.store(false, Ordering::Relaxed);
    for handle in handles {
        if handle.join().is_err() {
            warn!("worker panicked");
        }
    }
    outcome?;

    print!("{}", plane.report("Final statistics", None));
    Ok(())
}

/// Run until the duration elapses or a signal arrives, printing live
/// reports along the way.
fn serve(plane: &ControlPlane, config: &FilterConfig) {
    let start = Instant::now();
    let mut last_report = Instant::now();
    let mut last_stats = plane.stats();

    loop {
        if SHUTDOWN.load(Ordering::Relaxed) {
            info!("received shutdown signal, draining");
            break;
        }
        if !config.duration.is_zero() && start.elapsed() >= config.duration {
            info!(secs = config.duration.as_secs(), "run duration reached");
            break;
        }

        let elapsed = last_report.elapsed();
        if !config.report_interval.is_zero() && elapsed >= config.report_interval {
            print!("{}", plane.report("Live statistics", Some((&last_stats, elapsed))));
            last_stats = plane.stats();
            last_report = Instant::now();
        }

        thread::sleep(MAIN_TICK);
    }
}
