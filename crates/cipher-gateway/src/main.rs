//! # Cipher Gateway
//!
//! Binary entry point.
//!
//! ## Startup Sequence
//!
//! 1. Parse CLI flags
//! 2. Load configuration (missing file falls back to defaults)
//! 3. Initialize logging (`RUST_LOG` overrides the configured level)
//! 4. Register built-in handlers
//! 5. Serve until Ctrl+C, or run a maintenance subcommand and exit
//!
//! ## Subcommands
//!
//! - `serve` (default): run the gateway
//! - `keys generate`: write an RSA keypair for legacy clients
//! - `routes show` / `routes validate`: inspect the method route table

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cipher_gateway::dispatch::RouteSource;
use cipher_gateway::keys::generate_keypair;
use cipher_gateway::{register_builtins, GatewayConfig, GatewayService, HandlerRegistry, SystemClock};

/// Encrypted API gateway
#[derive(Parser, Debug)]
#[command(name = "cipher-gateway")]
#[command(about = "Encrypted API gateway with session keys and opaque method dispatch")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Force JSON log output
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// RSA keys for legacy `x-enc-key` clients
    Keys {
        #[command(subcommand)]
        action: KeysCmd,
    },
    /// Method route table
    Routes {
        #[command(subcommand)]
        action: RoutesCmd,
    },
}

#[derive(Subcommand, Debug)]
enum KeysCmd {
    /// Write rsa_private_key.pem and rsa_public_key.pem
    Generate {
        #[arg(long, default_value = "keys")]
        dir: PathBuf,
        #[arg(long, default_value_t = 2048)]
        bits: usize,
    },
}

#[derive(Subcommand, Debug)]
enum RoutesCmd {
    /// Print every method and its target
    Show,
    /// Check method names and that every target has a handler
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, loaded) = if args.config.exists() {
        let config = GatewayConfig::load(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?;
        (config, true)
    } else {
        (GatewayConfig::default(), false)
    };
    if let Some(port) = args.port {
        config.http.port = port;
    }

    init_logging(&config, args.json_logs)?;

    if loaded {
        info!(path = %args.config.display(), "Configuration loaded");
    } else {
        warn!(path = %args.config.display(), "Config file not found, using defaults");
    }

    let mut registry = HandlerRegistry::new();
    register_builtins(&mut registry, SystemClock::shared());
    info!(handlers = registry.len(), "Handlers registered");

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let service = GatewayService::new(config, registry).context("invalid configuration")?;
            service.run().await.context("gateway server failed")?;
        }
        Command::Keys {
            action: KeysCmd::Generate { dir, bits },
        } => {
            let pair = generate_keypair(&dir, bits).context("generating RSA keypair")?;
            println!("private key: {}", pair.private_path.display());
            println!("public key:  {}", pair.public_path.display());
            println!();
            println!("{}", pair.public_pem);
        }
        Command::Routes { action } => {
            let source = RouteSource::from_config(&config.dispatch);
            let table = source.load().context("loading route table")?;
            match action {
                RoutesCmd::Show => {
                    println!("routes from {}", source);
                    for (method, target) in table.entries() {
                        println!("{:<40} => {}", method, target);
                    }
                    println!("{} routes", table.len());
                }
                RoutesCmd::Validate => {
                    let report = table.validate(&registry);
                    for warning in &report.warnings {
                        println!("warning: {}", warning);
                    }
                    for error in &report.errors {
                        println!("error: {}", error);
                    }
                    if !report.is_ok() {
                        anyhow::bail!("{} route errors", report.errors.len());
                    }
                    println!("{} routes ok", table.len());
                }
            }
        }
    }

    Ok(())
}

fn init_logging(config: &GatewayConfig, force_json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("invalid log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.logging.json || force_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to install subscriber: {}", e))
}
