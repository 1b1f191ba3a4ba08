use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use log::error;
use rtmap::{
    config::{BoardConfig, ConfigError, IsolationConfig},
    session::{Session, SessionError},
    soc::board::Backend,
};

/// Runs the three-context coordination engine against a memory-mapped board.
#[derive(Debug, Parser)]
#[command(name = "rtmap", version)]
struct Cli {
    /// Board file; the bundled DE1-SoC layout is used when omitted.
    #[arg(long, value_name = "FILE")]
    board: Option<PathBuf>,
    /// Back every window with heap memory instead of the device file.
    #[arg(long)]
    simulate: bool,
    /// Counter value at which the mapping context stops.
    #[arg(long, value_name = "N")]
    bound: Option<u32>,
    /// Signal the consumer on every N-th counter increment.
    #[arg(long, value_name = "N")]
    signal_every: Option<u32>,
    /// Skip affinity, real-time scheduling and memory locking.
    #[arg(long)]
    no_isolation: bool,
    /// Log filter, e.g. `debug` or `rtmap=trace`. Defaults to `RUST_LOG`, then `info`.
    #[arg(long, value_name = "FILTER")]
    log_level: Option<String>,
}

fn init_logging(filter: Option<&str>) {
    let mut builder = match filter {
        Some(filter) => {
            let mut builder = env_logger::Builder::new();
            builder.parse_filters(filter);
            builder
        }
        None => env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")),
    };
    builder.format_timestamp_micros().init();
}

fn load_config(cli: &Cli) -> Result<BoardConfig, ConfigError> {
    let mut config = match &cli.board {
        Some(path) => BoardConfig::from_path(path)?,
        None => BoardConfig::builtin()?,
    };
    if let Some(bound) = cli.bound {
        config.run.bound = bound;
    }
    if let Some(every) = cli.signal_every {
        config.run.signal_every = every;
    }
    if cli.no_isolation {
        config.isolation = IsolationConfig::disabled();
    }
    config.validate()?;
    Ok(config)
}

fn run(cli: &Cli) -> Result<ExitCode, SessionError> {
    let config = load_config(cli)?;
    let backend = if cli.simulate {
        Backend::Simulated
    } else {
        Backend::Physical(config.device.clone())
    };
    let report = Session::new(config, backend).run()?;

    for (idx, nanos) in report.entries.iter().enumerate() {
        println!("interval {idx}:  {nanos}");
    }
    match report.summary() {
        Some(summary) => println!(
            "{} samples: min {} ns, max {} ns, mean {} ns",
            summary.count, summary.min, summary.max, summary.mean
        ),
        None => println!("no samples recorded"),
    }
    println!(
        "dropped: {} rollover, {} clock failures, {} over capacity",
        report.mapping.rollover_dropped, report.mapping.clock_failures, report.mapping.log_full_dropped
    );
    println!(
        "counter {} ({} producer + {} consumer), {} signals, {} consumer wake-ups",
        report.counter,
        report.producer.increments,
        report.consumer.increments,
        report.signals_posted,
        report.consumer.wakeups
    );
    Ok(report.exit_code())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());
    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            err.exit_code()
        }
    }
}
