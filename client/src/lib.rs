//! Client side of a DegenDome battle.
//!
//! Trades are submitted through a [BattleSession], which signs each trade
//! intent with a wallet-provided [SigningCapability] (falling back to the
//! unsigned legacy events when it cannot) and stamps it with a nonce drawn
//! from a shared [NonceSequencer]. Spectator bets go through [BetFlow], a
//! guarded state machine that must be driven from within a Tokio runtime.

pub mod bet_flow;
pub mod channel;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod nonce;
pub mod session;
pub mod signer;

pub use bet_flow::{BetConfig, BetFlow, BetFlowState, Operation, Rejected, Snapshot};
pub use channel::{Channel, WsChannel};
pub use nonce::NonceSequencer;
pub use session::{BattleMode, BattleSession, Submission};
pub use signer::{LocalWallet, SignError, SigningCapability, TradeSigner};

use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("wire error: {0}")]
    Wire(#[from] degendome_types::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid URL scheme: {0} (expected ws or wss)")]
    InvalidScheme(String),
    #[error("invalid wallet secret")]
    InvalidSecret,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("dial timeout")]
    DialTimeout,
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Milliseconds since the unix epoch, as observed by this client.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
