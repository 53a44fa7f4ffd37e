//! Polling daemon: runs V3 polls between in-process peers and emits
//! configuration templates.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use lcap_identity::IdentityManager;
use lcap_network::LoopbackNetwork;
use lcap_node::{init_logging, LcapNode, NodeConfig};
use lcap_types::{AccessType, ArchivalUnit, AuId, PollSpec};

const SIM_AU: &str = "org.example.simulated.1";
const SIM_ROOT: &str = "http://simulated.example.org/";

#[derive(Parser)]
#[command(name = "lcap-daemon", about = "V3 polling protocol daemon")]
struct Cli {
    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long, env = "LCAP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "LCAP_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "LCAP_LOG_FORMAT")]
    log_format: Option<String>,

    /// Enable Prometheus metrics (printed after a simulation).
    #[arg(long, env = "LCAP_ENABLE_METRICS")]
    metrics: bool,

    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run one poll between in-process peers and report the outcome.
    Simulate {
        /// Number of peers, including the poller.
        #[arg(long, default_value_t = 5)]
        peers: usize,

        /// Number of files in the simulated archival unit.
        #[arg(long, default_value_t = 8)]
        files: usize,

        /// Damage one file in the poller's copy so it loses and gets repaired.
        #[arg(long)]
        damaged: bool,

        /// Effort proof difficulty in leading one-bits (overrides the config).
        #[arg(long)]
        effort_bits: Option<u32>,

        /// Give up waiting for the poll after this many seconds.
        #[arg(long, default_value_t = 120)]
        timeout_secs: u64,
    },

    /// Print the effective configuration as TOML.
    Config,
}

fn load_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.clone();
    }
    config.enable_metrics |= cli.metrics;
    config.validate()?;
    Ok(config)
}

fn file_url(index: usize) -> String {
    format!("{SIM_ROOT}article-{index}.html")
}

fn file_body(index: usize) -> Vec<u8> {
    format!("<html><body>article {index}</body></html>").into_bytes()
}

fn spawn_peer(
    base: &NodeConfig,
    net: &LoopbackNetwork,
    index: usize,
    files: usize,
    damaged: bool,
) -> anyhow::Result<LcapNode> {
    let config = NodeConfig {
        peer_id: format!("sim-peer-{index}"),
        ..base.clone()
    };
    let mut node = LcapNode::new(config, net.clone())?;
    let au = AuId::new(SIM_AU)?;
    let content = node.content();
    content.add_au(ArchivalUnit::new(au.clone(), AccessType::Subscription));
    // The poll root itself is a file so it can be repaired.
    content.put(&au, SIM_ROOT, b"<html>index</html>".to_vec())?;
    for i in 0..files {
        content.put(&au, file_url(i), file_body(i))?;
    }
    if damaged {
        content.put(&au, SIM_ROOT, b"<html>ind\0x</html>".to_vec())?;
    }
    node.start()?;
    Ok(node)
}

async fn simulate(
    mut config: NodeConfig,
    peers: usize,
    files: usize,
    damaged: bool,
    effort_bits: Option<u32>,
    timeout: Duration,
) -> anyhow::Result<()> {
    anyhow::ensure!(peers >= 2, "a simulation needs at least two peers");
    if let Some(bits) = effort_bits {
        config.effort_bits = bits;
    }
    config.poller.quorum = config.poller.quorum.min(peers - 1);

    let net = LoopbackNetwork::new();
    let mut nodes = Vec::with_capacity(peers);
    for index in 0..peers {
        nodes.push(spawn_peer(&config, &net, index, files, damaged && index == 0)?);
    }

    let au = AuId::new(SIM_AU)?;
    let poller = nodes[0].id().clone();
    for voter in &nodes[1..] {
        // Enough past agreement with the poller for voters to serve it repairs.
        voter.identity().set_reputation(&poller, &au, 0.9)?;
    }

    let invitees = nodes[1..].iter().map(|n| n.id().clone()).collect();
    let spec = PollSpec::content(au, SIM_ROOT);
    let poll = nodes[0].call_poll(spec, invitees)?;
    tracing::info!(poll = %poll.key(), peers, files, damaged, "simulated poll called");

    let shutdown = nodes[0].shutdown_controller().clone();
    let status = tokio::select! {
        closed = tokio::time::timeout(timeout, poll.closed()) => {
            closed.context("poll did not close before the timeout")?
        }
        _ = shutdown.wait_for_signal() => {
            for node in &mut nodes {
                node.stop().await;
            }
            return Ok(());
        }
    };

    let tally = poll.tally();
    println!("poll      {}", poll.key());
    println!("state     {}", status.state);
    println!("result    {:?}", tally.result());
    println!("votes     {}", tally.vote_count());
    println!("agreement {:.3}", tally.weighted_agreement());
    if let Some(error) = poll.error() {
        println!("error     {error}");
    }
    for participant in poll.participants() {
        let outcome = match (&participant.dropped, participant.agrees) {
            (Some(reason), _) => format!("dropped: {reason:?}"),
            (None, Some(true)) => "agrees".to_string(),
            (None, Some(false)) => "disagrees".to_string(),
            (None, None) => "no vote".to_string(),
        };
        println!(
            "  {:<16} {:<22} {outcome}",
            participant.peer.to_string(),
            participant.state.to_string()
        );
    }

    if let Some(metrics) = nodes[0].metrics() {
        println!();
        print!("{}", metrics.encode()?);
    }

    for node in &mut nodes {
        node.stop().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Simulate {
            peers,
            files,
            damaged,
            effort_bits,
            timeout_secs,
        } => {
            init_logging(config.format()?, &config.log_level)?;
            simulate(
                config,
                peers,
                files,
                damaged,
                effort_bits,
                Duration::from_secs(timeout_secs),
            )
            .await?;
        }
    }

    Ok(())
}
