use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::signal::unix::{signal, SignalKind};

use xacto::store::Store;
use xacto::transaction::TransactionManager;
use xacto_server::config::ServerConfig;
use xacto_server::registry::ClientRegistry;
use xacto_server::server::{self, Server};
use xacto_server::trace;

#[derive(Debug, Parser)]
#[command(version, about = "Xacto transactional key-value store server")]
pub struct Args {
    /// Port to listen on [0 - 65535]
    #[clap(short = 'p', long = "port", allow_negative_numbers = true)]
    port: Option<i64>,

    /// Configuration file path
    #[clap(short = 'c', long = "config", default_value = "config/xacto.toml")]
    config: PathBuf,

    /// Log level for the rolling log file
    #[clap(short = 'l', long)]
    log_level: Option<String>,

    /// Directory for the rolling log file
    #[clap(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig::load(&args.config).unwrap_or_default();
    let port = resolve_port(&args, &config);

    let log_dir = args.log_dir.clone().unwrap_or_else(|| config.get_log_dir());
    let log_level = args.log_level.clone().unwrap_or_else(|| config.get_log_level());
    let _flush_guard = trace::init_logging(&log_dir, &log_level)?;
    info!("xacto-server starting with {:?}", args);

    let store = Arc::new(Store::new());
    let manager = Arc::new(TransactionManager::new());
    let registry = Arc::new(ClientRegistry::new());

    let srv = Server::bind(
        ("0.0.0.0", port),
        Arc::clone(&store),
        Arc::clone(&manager),
        Arc::clone(&registry),
    )
    .await?;
    let accept = tokio::spawn(async move { srv.serve().await });

    let mut hangup = signal(SignalKind::hangup())?;
    tokio::select! {
        _ = hangup.recv() => info!("SIGHUP received, shutting down"),
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
    }

    accept.abort();
    server::terminate(&registry, &store, &manager).await;
    info!("xacto-server terminating");
    Ok(())
}

/// Resolve the listen port from the CLI and config, enforcing the valid
/// range. A missing or invalid port is a usage error.
fn resolve_port(args: &Args, config: &ServerConfig) -> u16 {
    match args.port {
        Some(port) if (0..=65535).contains(&port) => port as u16,
        Some(port) => {
            eprintln!("invalid port argument: {} [0 - 65535]", port);
            usage_exit();
        }
        None => match config.port {
            Some(port) => port,
            None => {
                eprintln!("no port given on the command line or in {}", args.config.display());
                usage_exit();
            }
        },
    }
}

fn usage_exit() -> ! {
    eprintln!("Usage: xacto-server -p <port> [-c <config>] [-l <log-level>] [--log-dir <dir>]");
    process::exit(1);
}
