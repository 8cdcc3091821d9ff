use crate::{Error, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Schema tag carried by every [TradeIntentMessage].
pub const TRADE_MESSAGE_VERSION: u8 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Open,
    Close,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Open => "open",
            Action::Close => "close",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(Side::Long),
            "short" => Ok(Side::Short),
            _ => Err(Error::InvalidSide(s.to_string())),
        }
    }
}

/// Leverage multipliers offered in a battle.
///
/// Encoded on the wire as the bare multiplier (`10`, not `"10x"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Leverage {
    X2,
    X5,
    X10,
    X20,
}

impl Leverage {
    pub const ALL: [Leverage; 4] = [Leverage::X2, Leverage::X5, Leverage::X10, Leverage::X20];

    pub fn multiplier(&self) -> u8 {
        match self {
            Leverage::X2 => 2,
            Leverage::X5 => 5,
            Leverage::X10 => 10,
            Leverage::X20 => 20,
        }
    }
}

impl TryFrom<u8> for Leverage {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Leverage::ALL
            .into_iter()
            .find(|leverage| leverage.multiplier() == value)
            .ok_or_else(|| Error::InvalidLeverage(value.to_string()))
    }
}

impl From<Leverage> for u8 {
    fn from(value: Leverage) -> Self {
        value.multiplier()
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.multiplier())
    }
}

impl FromStr for Leverage {
    type Err = Error;

    /// Accepts `10` as well as `10x`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_suffix('x')
            .or_else(|| trimmed.strip_suffix('X'))
            .unwrap_or(trimmed);
        let value = digits
            .parse::<u8>()
            .map_err(|_| Error::InvalidLeverage(s.to_string()))?;
        Leverage::try_from(value)
    }
}

/// Parameters of a position the player wants to open.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionParams {
    pub asset: String,
    pub side: Side,
    pub leverage: Leverage,
    pub size: f64,
}

impl PositionParams {
    pub fn validate(&self) -> Result<()> {
        if self.asset.trim().is_empty() {
            return Err(Error::InvalidTrade("asset must not be empty"));
        }
        if !self.size.is_finite() || self.size <= 0.0 {
            return Err(Error::InvalidTrade("size must be a positive number"));
        }
        Ok(())
    }
}

/// A single player action pending authorization.
///
/// Field order is the canonical encoding order: signatures are computed over
/// [TradeIntentMessage::canonical_bytes] and any change to a field after
/// signing invalidates the signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeIntentMessage {
    pub version: u8,
    pub battle_id: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leverage: Option<Leverage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    pub timestamp: u64,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
}

impl TradeIntentMessage {
    pub fn open(battle_id: &str, params: &PositionParams, timestamp: u64, nonce: u64) -> Self {
        Self {
            version: TRADE_MESSAGE_VERSION,
            battle_id: battle_id.to_string(),
            action: Action::Open,
            asset: Some(params.asset.clone()),
            side: Some(params.side),
            leverage: Some(params.leverage),
            size: Some(params.size),
            timestamp,
            nonce,
            position_id: None,
        }
    }

    pub fn close(battle_id: &str, position_id: &str, timestamp: u64, nonce: u64) -> Self {
        Self {
            version: TRADE_MESSAGE_VERSION,
            battle_id: battle_id.to_string(),
            action: Action::Close,
            asset: None,
            side: None,
            leverage: None,
            size: None,
            timestamp,
            nonce,
            position_id: Some(position_id.to_string()),
        }
    }

    /// Bytes covered by the trade signature.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Check that the fields required by `action` are present.
    pub fn validate(&self) -> Result<()> {
        if self.version != TRADE_MESSAGE_VERSION {
            return Err(Error::InvalidTrade("unsupported version"));
        }
        if self.battle_id.is_empty() {
            return Err(Error::InvalidTrade("battle id must not be empty"));
        }
        match self.action {
            Action::Open => {
                let (Some(asset), Some(side), Some(leverage), Some(size)) =
                    (&self.asset, self.side, self.leverage, self.size)
                else {
                    return Err(Error::InvalidTrade("open requires asset, side, leverage and size"));
                };
                PositionParams {
                    asset: asset.clone(),
                    side,
                    leverage,
                    size,
                }
                .validate()
            }
            Action::Close => match &self.position_id {
                Some(id) if !id.is_empty() => Ok(()),
                _ => Err(Error::InvalidTrade("close requires a position id")),
            },
        }
    }
}

/// A trade intent together with its detached signature.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTradeEnvelope {
    pub message: TradeIntentMessage,
    /// Base58 signature over the canonical message bytes.
    pub signature: String,
    /// Base58 address of the signer.
    pub wallet_address: String,
}

impl SignedTradeEnvelope {
    /// Check the signature against the canonical bytes of `message` and the
    /// key encoded in `wallet_address`.
    pub fn verify(&self) -> Result<()> {
        let key = decode_address(&self.wallet_address)?;
        let signature = bs58::decode(&self.signature)
            .into_vec()
            .map_err(|_| Error::InvalidSignature)?;
        let signature = Signature::from_slice(&signature).map_err(|_| Error::InvalidSignature)?;
        let bytes = self.message.canonical_bytes()?;
        key.verify(&bytes, &signature)
            .map_err(|_| Error::InvalidSignature)
    }
}

/// Base58 address of an ed25519 public key.
pub fn encode_address(key: &VerifyingKey) -> String {
    bs58::encode(key.as_bytes()).into_string()
}

pub fn decode_address(address: &str) -> Result<VerifyingKey> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::InvalidAddress(address.to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| Error::InvalidAddress(address.to_string()))
}
