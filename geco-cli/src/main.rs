//! geco-cli - Command-line interface for GECO controllers
//!
//! One-shot reads and writes against a controller behind a TCP serial
//! adapter, plus a passive listener for buses that already have a master.

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use geco_client::{BusMode, Client, ClientConfig, TcpConnector};
use geco_protocol::Endpoint;
use geco_registers::Block;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "geco-cli")]
#[command(about = "Command-line interface for GECO heat-pump controllers")]
#[command(version)]
struct Cli {
    /// Adapter host name or IP address
    #[arg(short, long, env = "GECO_DEVICE_ADDRESS", default_value = "192.168.1.100")]
    address: String,

    /// Adapter TCP port
    #[arg(short, long, env = "GECO_DEVICE_PORT", default_value_t = 8899)]
    port: u16,

    /// Our bus address as hard/soft (the master's when listening)
    #[arg(long, default_value = "1/1", value_parser = parse_endpoint)]
    controller: Endpoint,

    /// Heat pump bus address as hard/soft
    #[arg(long, default_value = "2/2", value_parser = parse_endpoint)]
    device: Endpoint,

    /// Response timeout in milliseconds
    #[arg(long, env = "GECO_RESPONSE_TIMEOUT_MS", default_value_t = 5000)]
    timeout_ms: u64,

    /// Retries after the first attempt
    #[arg(long, env = "GECO_RETRIES", default_value_t = 2)]
    retries: u32,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Read the status block
    Status,

    /// Read the config block
    Config,

    /// Change one config register
    Set {
        /// Register name, e.g. TapWaterTemp
        name: String,

        /// New value: a number, ON/OFF, an option label or code, or 24 hour
        /// digits of 0/1 starting at midnight
        value: String,
    },

    /// Read a block and show its raw registers
    Dump {
        #[arg(value_enum, default_value = "status")]
        block: BlockArg,
    },

    /// List the register map (no connection needed)
    Registers {
        /// Only this block
        #[arg(value_enum)]
        block: Option<BlockArg>,
    },

    /// Decode an existing master's traffic until interrupted (never transmits)
    Listen {
        /// Stop after this many observations
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BlockArg {
    Status,
    Config,
}

impl From<BlockArg> for Block {
    fn from(arg: BlockArg) -> Self {
        match arg {
            BlockArg::Status => Block::Status,
            BlockArg::Config => Block::Config,
        }
    }
}

/// Parses `hard/soft`.
fn parse_endpoint(s: &str) -> Result<Endpoint, String> {
    let (hard, soft) = s
        .split_once('/')
        .ok_or_else(|| format!("expected hard/soft, got '{s}'"))?;
    let hard = hard
        .trim()
        .parse()
        .map_err(|_| format!("invalid hard address '{hard}'"))?;
    let soft = soft
        .trim()
        .parse()
        .map_err(|_| format!("invalid soft address '{soft}'"))?;
    Ok(Endpoint::new(hard, soft))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // The register map is local
    if let Commands::Registers { block } = &cli.command {
        println!("{}", commands::list_registers(block.map(Block::from), cli.json)?);
        return Ok(());
    }

    let mode = match cli.command {
        Commands::Listen { .. } => BusMode::Eavesdrop,
        _ => BusMode::Direct,
    };
    let config = ClientConfig::default()
        .with_endpoints(cli.controller, cli.device)
        .with_mode(mode)
        .with_response_timeout(Duration::from_millis(cli.timeout_ms))
        .with_retries(cli.retries);
    let client = Client::new(TcpConnector::new(cli.address.clone(), cli.port), config);

    client.connect().await.map_err(|e| {
        eprintln!(
            "{} to {}:{}: {}",
            "Connection failed".red(),
            cli.address,
            cli.port,
            e
        );
        e
    })?;

    if let Commands::Listen { count } = cli.command {
        eprintln!(
            "{} traffic between {} and {}",
            "Listening for".green(),
            cli.controller.to_string().cyan(),
            cli.device.to_string().cyan()
        );
        eprintln!("{}", "Press Ctrl+C to stop...".dimmed());
        commands::listen(&client, count, cli.json).await?;
        client.close().await;
        return Ok(());
    }

    let result = commands::execute(&client, cli.command, cli.json).await;
    client.close().await;

    match result {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }

    Ok(())
}
