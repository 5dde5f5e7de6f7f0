use clap::Parser;
use log::{error, info};
use server::network::RelayServer;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent peers
    #[arg(short, long, default_value = "32")]
    max_clients: usize,

    /// Seconds of silence before a peer is dropped
    #[arg(short, long, default_value = "10")]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    info!("Starting relay on {}", address);
    info!(
        "Max clients: {}, peer timeout: {}s",
        args.max_clients, args.timeout_secs
    );

    let relay = RelayServer::bind(
        &address,
        args.max_clients,
        Duration::from_secs(args.timeout_secs),
    )
    .await?;

    let relay_handle = tokio::spawn(relay.run());

    tokio::select! {
        result = relay_handle => {
            if let Err(e) = result {
                error!("Relay task panicked: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
