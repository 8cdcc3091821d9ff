pub mod bet;
pub mod events;
pub mod trade;

pub use bet::{BetPlaced, FighterSide, PendingBet, QuickSize};
pub use events::{Frame, Inbound, Outbound, PositionAck};
pub use trade::{
    decode_address, encode_address, Action, Leverage, PositionParams, Side, SignedTradeEnvelope,
    TradeIntentMessage, TRADE_MESSAGE_VERSION,
};

use thiserror::Error;

/// Error type for encoding, decoding and validating wire types.
#[derive(Error, Debug)]
pub enum Error {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("{event}: missing argument {index}")]
    MissingArgument { event: &'static str, index: usize },
    #[error("invalid leverage: {0} (expected one of 2, 5, 10, 20)")]
    InvalidLeverage(String),
    #[error("invalid side: {0} (expected long or short)")]
    InvalidSide(String),
    #[error("invalid trade: {0}")]
    InvalidTrade(&'static str),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid bet amount: {0}")]
    InvalidAmount(f64),
    #[error("bet amount {amount} is below the minimum of {min}")]
    BetBelowMinimum { amount: f64, min: f64 },
    #[error("bet amount {amount} is above the maximum of {max}")]
    BetAboveMaximum { amount: f64, max: f64 },
}

/// Result type for wire type operations.
pub type Result<T> = std::result::Result<T, Error>;
