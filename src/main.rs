use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use statsd_ostools::config::Config;
use statsd_ostools::sink::{MetricSink, StatsdClient};
use statsd_ostools::types::Tool;
use statsd_ostools::worker::{self, WorkerExit};

#[derive(Parser, Debug)]
#[command(
    name = "statsd-ostools",
    about = "Send iostat, mpstat and vmstat samples with <prefix> to statsd",
    after_help = "ie: statsd-ostools stats.ostools.hostname"
)]
struct Cli {
    /// Stats prefix, e.g. stats.ostools.hostname
    prefix: Option<String>,

    /// statsd hostname/ip
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// statsd port
    #[arg(short, long)]
    port: Option<u16>,

    /// Interval to pass to stat commands, in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Send values truncated to integers
    #[arg(long)]
    integers: bool,

    /// Turn on debugging
    #[arg(short, long)]
    debug: bool,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate config and exit
    #[arg(long)]
    check: bool,
}

impl Cli {
    /// Command-line values win over the configuration file
    fn apply(&self, config: &mut Config) {
        if let Some(ref prefix) = self.prefix {
            config.statsd.prefix = prefix.clone();
        }
        if let Some(ref host) = self.host {
            config.statsd.host = host.clone();
        }
        if let Some(port) = self.port {
            config.statsd.port = port;
        }
        if let Some(interval) = self.interval {
            config.collector.interval_secs = interval;
        }
        if self.integers {
            config.collector.send_integers = true;
        }
        if self.debug {
            config.agent.log_level = "debug".to_string();
        }
    }
}

#[tokio::main(worker_threads = 2)]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match cli.config {
        Some(ref path) => Config::load(path)?,
        None => Config::default(),
    };
    cli.apply(&mut config);
    config.validate()?;

    if cli.check {
        println!("Configuration is valid.");
        return Ok(());
    }

    // Initialize logging
    init_logging(&config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        hostname = %config.agent.hostname,
        statsd = %format!("{}:{}", config.statsd.host, config.statsd.port),
        prefix = %config.statsd.prefix,
        interval_secs = config.collector.interval_secs,
        "Starting statsd-ostools"
    );

    if let Err(e) = run(config).await {
        error!(error = %e, "Agent terminated with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(config: &Config) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new(&config.agent.log_level)
        });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let sink: Arc<dyn MetricSink> = Arc::new(StatsdClient::connect(&config.statsd).await?);
    let workers = worker::create_workers(&config.collector, sink);

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    for w in workers {
        let token = cancel.child_token();
        tasks.spawn(async move {
            let tool = w.tool();
            (tool, w.run(token).await)
        });
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                info!("Received shutdown signal, stopping workers");
                break;
            }
            joined = tasks.join_next() => {
                match joined {
                    Some(joined) => log_outcome(joined),
                    None => {
                        warn!("All workers have exited");
                        return Ok(());
                    }
                }
            }
        }
    }

    cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        log_outcome(joined);
    }

    info!("Shutdown complete");
    Ok(())
}

fn log_outcome(joined: Result<(Tool, Result<WorkerExit>), tokio::task::JoinError>) {
    match joined {
        Ok((tool, Ok(exit))) => info!(tool = %tool, exit = ?exit, "Worker finished"),
        Ok((tool, Err(e))) => error!(tool = %tool, error = %format!("{:#}", e), "Worker failed"),
        Err(e) => error!(error = %e, "Worker task panicked"),
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
