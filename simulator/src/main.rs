use anyhow::{Context, Result};
use clap::Parser;
use degendome_simulator::{Api, Simulator, SimulatorConfig};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Delay before acknowledging a bet, in milliseconds.
    #[arg(long, default_value_t = 0)]
    bet_delay_ms: u64,

    /// Never answer bets (clients time out).
    #[arg(long, default_value_t = false)]
    silent_bets: bool,

    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Emit logs as JSON.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn build_config(args: &Args) -> SimulatorConfig {
    SimulatorConfig {
        bet_delay: Duration::from_millis(args.bet_delay_ms),
        silent_bets: args.silent_bets,
    }
}

fn init_tracing(args: &Args) {
    let builder = tracing_subscriber::fmt().with_max_level(args.log_level);
    if args.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args);

    let config = build_config(&args);
    info!(
        bet_delay_ms = args.bet_delay_ms,
        silent_bets = config.silent_bets,
        "Starting battle simulator"
    );
    let simulator = Arc::new(Simulator::new(config));
    let app = Api::new(simulator).router();

    // Start server
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}
