/// weaver daemon - mass circuit builder
///
/// Reads a batch of circuit orders, drives the orchestrator against a
/// relay snapshot and the simulated control channel, and prints the
/// per-order results. Optionally serves result snapshots over HTTP while
/// the batch runs.

use anyhow::{anyhow, bail, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

use weaver_common::{Order, OrchestratorConfig};
use weaver_core::{InMemoryDirectory, Orchestrator, RelayDescriptor};
use weaver_daemon::{report, ApiServer, SimChannel, SimChannelConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "help" | "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            "version" | "--version" | "-v" => {
                println!("weaverd v{}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            _ => {}
        }
    }

    let options = CliOptions::parse(&args[1..]).map_err(|err| {
        eprintln!("error: {}", err);
        eprintln!("Run with 'help' to see usage");
        anyhow!("invalid arguments")
    })?;

    run(options).await
}

/// Parsed command line
struct CliOptions {
    order_file: PathBuf,
    relay_file: PathBuf,
    config_file: Option<PathBuf>,
    api_addr: Option<SocketAddr>,
    build_failure_rate: f64,
    stream_failure_rate: f64,
}

impl CliOptions {
    fn parse(args: &[String]) -> Result<Self> {
        let mut positional = Vec::new();
        let mut config_file = None;
        let mut api_addr = None;
        let mut build_failure_rate = 0.0;
        let mut stream_failure_rate = 0.0;

        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => {
                    let value = iter.next().ok_or_else(|| anyhow!("--config needs a path"))?;
                    config_file = Some(PathBuf::from(value));
                }
                "--api" => {
                    let value = iter.next().ok_or_else(|| anyhow!("--api needs an address"))?;
                    api_addr = Some(value.parse().context("invalid --api address")?);
                }
                "--build-failure-rate" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| anyhow!("--build-failure-rate needs a value"))?;
                    build_failure_rate = value.parse().context("invalid build failure rate")?;
                }
                "--stream-failure-rate" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| anyhow!("--stream-failure-rate needs a value"))?;
                    stream_failure_rate = value.parse().context("invalid stream failure rate")?;
                }
                other if other.starts_with("--") => bail!("unknown flag: {}", other),
                other => positional.push(PathBuf::from(other)),
            }
        }

        let [order_file, relay_file]: [PathBuf; 2] = positional
            .try_into()
            .map_err(|_| anyhow!("expected <order-file> and <relay-snapshot>"))?;

        Ok(Self {
            order_file,
            relay_file,
            config_file,
            api_addr,
            build_failure_rate,
            stream_failure_rate,
        })
    }
}

async fn run(options: CliOptions) -> Result<()> {
    info!("Starting weaverd v{}", env!("CARGO_PKG_VERSION"));

    let config = match &options.config_file {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            OrchestratorConfig::from_file(path)?
        }
        None => OrchestratorConfig::default(),
    };

    let relays = load_relays(&options.relay_file)?;
    info!(
        "Loaded {} relays from {:?}",
        relays.len(),
        options.relay_file
    );
    let directory = Arc::new(InMemoryDirectory::new(relays));

    let channel = Arc::new(SimChannel::new(SimChannelConfig {
        build_failure_rate: options.build_failure_rate,
        stream_failure_rate: options.stream_failure_rate,
        ..Default::default()
    }));

    let orchestrator = Orchestrator::spawn(config, directory, channel.clone());

    if let Some(addr) = options.api_addr {
        let api_server = ApiServer::new(addr, orchestrator.handle());
        tokio::spawn(async move {
            if let Err(e) = api_server.start().await {
                warn!("API server error: {}", e);
            }
        });
    }

    let submitted = submit_orders(&orchestrator, &options.order_file).await?;
    if submitted == 0 {
        warn!("No valid orders in {:?}", options.order_file);
        orchestrator.shutdown().await?;
        return Ok(());
    }
    info!("{} order(s) submitted, waiting for completion", submitted);

    orchestrator.wait_idle().await?;

    let snapshot = orchestrator.snapshot().await?;
    report::print_report(&snapshot);

    let sim_stats = channel.stats();
    info!(
        "simulation: {} circuits built, {} streams attached, {} teardowns",
        sim_stats.circuits_built, sim_stats.streams_attached, sim_stats.teardowns
    );

    orchestrator.shutdown().await?;
    Ok(())
}

fn load_relays(path: &PathBuf) -> Result<Vec<RelayDescriptor>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read relay snapshot {:?}", path))?;
    let relays: Vec<RelayDescriptor> = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse relay snapshot {:?}", path))?;
    Ok(relays)
}

/// Submit every well-formed order line; rejected lines are logged and
/// skipped so one typo never sinks the batch.
async fn submit_orders(orchestrator: &Orchestrator, path: &PathBuf) -> Result<usize> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read order file {:?}", path))?;

    let mut submitted = 0;
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match Order::parse(line) {
            Ok(order) => {
                let id = orchestrator.submit(order).await?;
                info!("line {}: submitted as {}", number + 1, id);
                submitted += 1;
            }
            Err(err) => {
                warn!("line {} rejected: {}", number + 1, err);
            }
        }
    }
    Ok(submitted)
}

/// Print help message
fn print_help() {
    println!("weaverd - mass circuit builder");
    println!();
    println!("USAGE:");
    println!("    weaverd <order-file> <relay-snapshot> [OPTIONS]");
    println!("    weaverd help | version");
    println!();
    println!("ARGS:");
    println!("    <order-file>       one order per line:");
    println!("                       <count> [guard|*] [middle|*] [exit|*] [dest[:port]|*] [extra]");
    println!("    <relay-snapshot>   JSON array of relay descriptors");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>               orchestrator TOML configuration");
    println!("    --api <addr>                  serve results over HTTP, e.g. 127.0.0.1:9150");
    println!("    --build-failure-rate <0..1>   simulated build failure probability");
    println!("    --stream-failure-rate <0..1>  simulated stream failure probability");
    println!();
    println!("EXAMPLES:");
    println!("    # Build 10000 unconstrained circuits");
    println!("    echo '10000 * * * *' > orders.txt");
    println!("    weaverd orders.txt relays.json");
    println!();
    println!("    # Pin the guard, stream to a destination, watch progress over HTTP");
    println!("    echo '500 192.0.2.1 * * 93.184.216.34:443' > orders.txt");
    println!("    weaverd orders.txt relays.json --api 127.0.0.1:9150");
}
