//! SFX Server Binary
//!
//! Usage: sfx-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>  Path to configuration file
//!   -g, --generate       Print the default configuration as TOML
//!   -p, --port <PORT>    Override the listen port
//!   -l, --listen <ADDR>  Override the listen address
//!   -h, --help           Print help information

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use sfx::server::{Server, ServerConfig, ServerConfigFile};

#[derive(Debug, Parser)]
#[command(
    name = "sfx-server",
    version,
    about = "SecureFileXchange key-exchange and file server"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the default configuration as TOML and exit
    #[arg(short, long)]
    generate: bool,

    /// Override the listen port
    #[arg(short, long, env = "SFX_PORT")]
    port: Option<u16>,

    /// Override the listen address
    #[arg(short, long, env = "SFX_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; respects RUST_LOG (e.g. RUST_LOG=debug,audit=info)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if cli.generate {
        return generate_config();
    }

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listen_port = port;
    }
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    run_server(config).await
}

fn generate_config() -> anyhow::Result<()> {
    let config_file = ServerConfigFile::from_config(&ServerConfig::default());

    println!("# SFX Server Configuration");
    println!("# Generated: {}", chrono::Utc::now());
    println!();
    println!("{}", config_file.to_toml()?);

    Ok(())
}

fn load_config(path: &PathBuf) -> anyhow::Result<ServerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = ServerConfigFile::from_toml(&content)?.to_config()?;
    Ok(config)
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    config.validate()?;

    tracing::info!("Starting SFX server on {}", config.bind_addr());
    tracing::info!("Upload directory: {}", config.upload_dir.display());
    match &config.audit_log {
        Some(path) => tracing::info!("Audit log: {}", path.display()),
        None => tracing::info!("Audit log: tracing target 'audit'"),
    }

    let server = Server::new(config).await?;
    server.run().await?;

    Ok(())
}
