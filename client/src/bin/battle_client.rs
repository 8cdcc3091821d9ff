//! Battle client - submits trades and spectator bets to a battle authority.
//!
//! Usage:
//!   cargo run --bin battle-client -- --config client.yaml open --asset SOL --side long --leverage 10x --size 100
//!   cargo run --bin battle-client -- --config client.yaml close --position-id pos-1
//!   cargo run --bin battle-client -- --config client.yaml bet --fighter-wallet <ADDRESS> --fighter-name degen --side left
//!   cargo run --bin battle-client -- --config client.yaml bet --fighter-wallet <ADDRESS> --quick half --balance 0.58

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use degendome_client::{
    BattleMode, BattleSession, BetConfig, BetFlow, Channel, LocalWallet, NonceSequencer,
    SigningCapability, TradeSigner, WsChannel,
};
use degendome_types::{FighterSide, Inbound, Leverage, QuickSize, Side};
use serde::Deserialize;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(author, version, about = "Submit trades and bets to a DegenDome battle")]
struct Args {
    /// YAML configuration file.
    #[arg(short, long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a position.
    Open {
        #[arg(long)]
        asset: String,
        #[arg(long)]
        side: Side,
        #[arg(long)]
        leverage: Leverage,
        #[arg(long)]
        size: f64,
    },
    /// Close a position.
    Close {
        #[arg(long)]
        position_id: String,
    },
    /// Back a fighter as a spectator.
    Bet {
        #[arg(long)]
        fighter_wallet: String,
        #[arg(long, default_value = "fighter")]
        fighter_name: String,
        #[arg(long, value_enum, default_value_t = Corner::Left)]
        side: Corner,
        /// Defaults to the configured starting amount.
        #[arg(long, conflicts_with_all = ["preset", "quick"])]
        amount: Option<f64>,
        /// Index into the bet picker's preset amounts.
        #[arg(long, conflicts_with = "quick")]
        preset: Option<usize>,
        /// Bet a share of --balance.
        #[arg(long, value_enum, requires = "balance")]
        quick: Option<Quick>,
        /// Wallet balance in SOL.
        #[arg(long)]
        balance: Option<f64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Corner {
    Left,
    Right,
}

impl From<Corner> for FighterSide {
    fn from(corner: Corner) -> Self {
        match corner {
            Corner::Left => FighterSide::Left,
            Corner::Right => FighterSide::Right,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum Quick {
    Quarter,
    Half,
    Max,
}

impl From<Quick> for QuickSize {
    fn from(quick: Quick) -> Self {
        match quick {
            Quick::Quarter => QuickSize::Quarter,
            Quick::Half => QuickSize::Half,
            Quick::Max => QuickSize::Max,
        }
    }
}

#[derive(Deserialize, Debug)]
struct Config {
    url: String,
    battle_id: String,
    /// Practice battles submit unsigned trades.
    #[serde(default)]
    solo: bool,
    /// Base58-encoded 32 byte wallet seed. Without one, trades go out unsigned.
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    first_time_bettor: bool,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    json_logs: bool,
    #[serde(default = "default_ack_timeout_ms")]
    ack_timeout_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ack_timeout_ms() -> u64 {
    3_000
}

impl Config {
    fn load(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read config file {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&contents).context("Could not parse config file")?;
        if config.battle_id.trim().is_empty() {
            bail!("battle_id must not be empty");
        }
        Ok(config)
    }

    fn mode(&self) -> BattleMode {
        if self.solo {
            BattleMode::Practice
        } else {
            BattleMode::Duel
        }
    }

    fn wallet(&self) -> Result<Option<Arc<LocalWallet>>> {
        self.secret
            .as_deref()
            .map(|secret| {
                LocalWallet::from_base58(secret)
                    .map(Arc::new)
                    .context("Wallet secret is invalid")
            })
            .transpose()
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    let level: Level = config
        .log_level
        .parse()
        .with_context(|| format!("Invalid log level {}", config.log_level))?;
    let builder = tracing_subscriber::fmt().with_max_level(level);
    if config.json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;
    init_tracing(&config)?;

    let wallet = config.wallet()?;
    info!(
        url = %config.url,
        battle_id = %config.battle_id,
        mode = ?config.mode(),
        wallet = wallet.as_ref().map(|wallet| wallet.address()).unwrap_or("none"),
        "connecting"
    );
    let channel = Arc::new(
        WsChannel::connect(&config.url)
            .await
            .with_context(|| format!("Failed to connect to {}", config.url))?,
    );
    let ack_timeout = Duration::from_millis(config.ack_timeout_ms);

    match args.command {
        Command::Open {
            asset,
            side,
            leverage,
            size,
        } => {
            let session = session(&config, wallet, channel.clone());
            let mut events = channel.subscribe();
            let submission = session
                .open_position(&asset, side, leverage, size)
                .await
                .context("Failed to submit open")?;
            info!(?submission, "open submitted");
            await_ack(&mut events, ack_timeout).await;
        }
        Command::Close { position_id } => {
            let session = session(&config, wallet, channel.clone());
            let mut events = channel.subscribe();
            let submission = session
                .close_position(&position_id)
                .await
                .context("Failed to submit close")?;
            info!(?submission, "close submitted");
            await_ack(&mut events, ack_timeout).await;
        }
        Command::Bet {
            fighter_wallet,
            fighter_name,
            side,
            amount,
            preset,
            quick,
            balance,
        } => {
            let flow = BetFlow::new(
                BetConfig::new(&config.battle_id, config.first_time_bettor),
                channel,
            );
            flow.set_wallet(wallet.and_then(|wallet| wallet.identity()));
            match (amount, preset, quick.zip(balance)) {
                (Some(amount), _, _) => flow.select_amount(amount)?,
                (None, Some(index), _) => flow.select_preset(index)?,
                (None, None, Some((quick, balance))) => flow.select_quick(balance, quick.into())?,
                (None, None, None) => flow.state(),
            };
            flow.initiate_swipe_bet(side.into(), &fighter_wallet, &fighter_name)?;
            let state = flow.confirm_bet().await?;
            let snapshot = flow.snapshot();
            match snapshot.error {
                Some(error) => bail!("Bet failed ({state}): {error}"),
                None => info!(%state, amount = snapshot.selected_amount, "bet finished"),
            }
        }
    }
    Ok(())
}

fn session(
    config: &Config,
    wallet: Option<Arc<LocalWallet>>,
    channel: Arc<WsChannel>,
) -> BattleSession {
    let signer = match wallet {
        Some(wallet) => TradeSigner::new(wallet),
        None => TradeSigner::disconnected(),
    };
    BattleSession::new(
        &config.battle_id,
        config.mode(),
        signer,
        Arc::new(NonceSequencer::new()),
        channel,
    )
}

/// Log the first acknowledgement or error, if one arrives in time.
async fn await_ack(events: &mut tokio::sync::broadcast::Receiver<Inbound>, ack_timeout: Duration) {
    let outcome = tokio::time::timeout(ack_timeout, async {
        loop {
            match events.recv().await {
                Ok(Inbound::PositionOpened(ack)) | Ok(Inbound::PositionClosed(ack)) => {
                    return Ok(ack)
                }
                Ok(Inbound::Error(message)) => return Err(message),
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return Err("connection closed".to_string()),
            }
        }
    })
    .await;
    match outcome {
        Ok(Ok(ack)) => info!(position_id = %ack.position_id, "acknowledged"),
        Ok(Err(message)) => warn!(error = %message, "rejected"),
        Err(_) => warn!("no acknowledgement received"),
    }
}
