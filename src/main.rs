//! duosync
//!
//! Runs two nodes against each other over the in-memory radio, or prints the
//! effective configuration.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use duosync::node::{Node, NodeConfig};
use duosync::sync::SyncProtocol;
use duosync::transport::{SimNetwork, SimTransport};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

const FIRST_ADDRESS: &str = "AA:00:00:00:00:01";
const SECOND_ADDRESS: &str = "AA:00:00:00:00:02";

#[derive(Parser, Debug)]
#[command(name = "duosync", version, about = "Two-peer leader election and counter sync")]
struct Cli {
    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file; missing fields take their defaults
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Override the counter increment interval
    #[arg(long, global = true)]
    counter_interval_ms: Option<u64>,

    /// Override the sync push / poll interval
    #[arg(long, global = true)]
    sync_interval_ms: Option<u64>,

    /// Override the sync payload variant
    #[arg(long, value_enum, global = true)]
    protocol: Option<ProtocolArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run two simulated nodes until the duration elapses or Ctrl+C
    Simulate {
        /// How long to run
        #[arg(long, default_value_t = 60)]
        duration_secs: u64,

        /// Delay before the second node boots
        #[arg(long, default_value_t = 2_000)]
        boot_gap_ms: u64,

        /// Seed for the backoff jitter of both nodes
        #[arg(long)]
        seed: Option<u64>,

        /// Drop every link of the first node at this point, as if it left range
        #[arg(long)]
        drop_at_secs: Option<u64>,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProtocolArg {
    Timed,
    Legacy,
}

impl From<ProtocolArg> for SyncProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Timed => SyncProtocol::Timed,
            ProtocolArg::Legacy => SyncProtocol::Legacy,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;

    match cli.command {
        Command::Config => {
            println!("{}", config.to_json()?);
        }
        Command::Simulate {
            duration_secs,
            boot_gap_ms,
            seed,
            drop_at_secs,
        } => {
            simulate(
                config,
                Duration::from_secs(duration_secs),
                Duration::from_millis(boot_gap_ms),
                seed,
                drop_at_secs.map(Duration::from_secs),
            )
            .await?;
        }
    }
    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NodeConfig::default(),
    };

    if let Some(ms) = cli.counter_interval_ms {
        config = config.with_counter_interval_ms(ms);
    }
    if let Some(ms) = cli.sync_interval_ms {
        config = config.with_sync_interval_ms(ms);
    }
    if let Some(protocol) = cli.protocol {
        config = config.with_protocol(protocol.into());
    }

    config.validate()?;
    Ok(config)
}

fn rng_for(seed: Option<u64>, salt: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(salt)),
        None => StdRng::from_entropy(),
    }
}

async fn simulate(
    config: NodeConfig,
    duration: Duration,
    boot_gap: Duration,
    seed: Option<u64>,
    drop_after: Option<Duration>,
) -> anyhow::Result<()> {
    let network = SimNetwork::new();
    let started = Instant::now();

    let mut first = Node::with_rng(network.attach(FIRST_ADDRESS).await, config.clone(), rng_for(seed, 1))?;
    first.start().await?;

    let mut second: Option<Node<SimTransport>> = None;
    let mut drop_at = drop_after.map(|d| started + d);

    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!(
        duration_secs = duration.as_secs(),
        boot_gap_ms = boot_gap.as_millis() as u64,
        "Simulation running. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received...");
                break;
            }
        }

        let now = Instant::now();
        if now.duration_since(started) >= duration {
            break;
        }

        if second.is_none() && now.duration_since(started) >= boot_gap {
            let transport = network.attach(SECOND_ADDRESS).await;
            let mut node = Node::with_rng(transport, config.clone(), rng_for(seed, 2))?;
            node.start().await?;
            second = Some(node);
        }

        if drop_at.is_some_and(|at| now >= at) {
            let dropped = network.drop_links(&first.address()).await;
            tracing::info!(dropped, "Dropped links of {}", first.identity());
            drop_at = None;
        }

        first.tick().await;
        if let Some(node) = second.as_mut() {
            node.tick().await;
        }
    }

    tracing::info!("Final: {}", first.status());
    first.shutdown().await;
    if let Some(mut node) = second {
        tracing::info!("Final: {}", node.status());
        node.shutdown().await;
    }
    Ok(())
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    // Only apply defaults if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        if let Ok(directive) = level.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
