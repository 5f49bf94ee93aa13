//! Broker daemon entry point.
//!
//! Starts the socket broker on a Unix socket path and runs until
//! interrupted. Workers reach it through `sockbroker_rpc::Client` with
//! the same path.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sockbroker_daemon::Broker;
use sockbroker_rpc::client::default_socket_path;

/// Socket broker - binds listening sockets once and hands duplicates to workers
#[derive(Parser, Debug)]
#[command(name = "sockbroker-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Custom socket path (defaults to `$XDG_RUNTIME_DIR/sockbroker.sock` or `/tmp/sockbroker.sock`)
    #[arg(long, value_name = "PATH")]
    socket_path: Option<PathBuf>,
}

fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "sockbroker_daemon={default_level},sockbroker_rpc={default_level}"
            ))
        });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    setup_logging();

    let path = args.socket_path.unwrap_or_else(default_socket_path);
    let broker = Broker::start(&path).await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");

    broker.close();
    Ok(())
}
