//! Named events exchanged with the battle authority.
//!
//! Each frame is a JSON array whose first element is the event name and whose
//! remaining elements are positional arguments:
//! `["place_bet", "battle-1", "<backed>", 0.1, "<bettor>"]`.

use crate::{bet::BetPlaced, trade::PositionParams, Error, Result, SignedTradeEnvelope};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

pub const OPEN_POSITION: &str = "open_position";
pub const OPEN_POSITION_SIGNED: &str = "open_position_signed";
pub const CLOSE_POSITION: &str = "close_position";
pub const CLOSE_POSITION_SIGNED: &str = "close_position_signed";
pub const PLACE_BET: &str = "place_bet";
pub const BET_PLACED: &str = "bet_placed";
pub const POSITION_OPENED: &str = "position_opened";
pub const POSITION_CLOSED: &str = "position_closed";
pub const ERROR: &str = "error";

/// Untyped event frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub event: String,
    pub args: Vec<Value>,
}

impl Frame {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(self.args.len() + 1))?;
        seq.serialize_element(&self.event)?;
        for arg in &self.args {
            seq.serialize_element(arg)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Frame {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut items = Vec::<Value>::deserialize(deserializer)?;
        if items.is_empty() {
            return Err(serde::de::Error::custom("frame must contain an event name"));
        }
        let Value::String(event) = items.remove(0) else {
            return Err(serde::de::Error::custom("event name must be a string"));
        };
        Ok(Self { event, args: items })
    }
}

/// Pull the positional argument at `index` out of a frame.
fn arg<T: DeserializeOwned>(args: &[Value], event: &'static str, index: usize) -> Result<T> {
    let value = args
        .get(index)
        .cloned()
        .ok_or(Error::MissingArgument { event, index })?;
    Ok(serde_json::from_value(value)?)
}

/// Events sent by the client.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    OpenPosition {
        battle_id: String,
        params: PositionParams,
    },
    ClosePosition {
        battle_id: String,
        position_id: String,
    },
    OpenPositionSigned(SignedTradeEnvelope),
    ClosePositionSigned(SignedTradeEnvelope),
    PlaceBet {
        battle_id: String,
        backed_wallet: String,
        amount: f64,
        betting_wallet: String,
    },
}

impl Outbound {
    pub fn name(&self) -> &'static str {
        match self {
            Outbound::OpenPosition { .. } => OPEN_POSITION,
            Outbound::ClosePosition { .. } => CLOSE_POSITION,
            Outbound::OpenPositionSigned(_) => OPEN_POSITION_SIGNED,
            Outbound::ClosePositionSigned(_) => CLOSE_POSITION_SIGNED,
            Outbound::PlaceBet { .. } => PLACE_BET,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Outbound::OpenPositionSigned(_) | Outbound::ClosePositionSigned(_)
        )
    }

    pub fn to_frame(&self) -> Result<Frame> {
        let args = match self {
            Outbound::OpenPosition { battle_id, params } => {
                vec![Value::from(battle_id.as_str()), serde_json::to_value(params)?]
            }
            Outbound::ClosePosition {
                battle_id,
                position_id,
            } => vec![
                Value::from(battle_id.as_str()),
                Value::from(position_id.as_str()),
            ],
            Outbound::OpenPositionSigned(envelope) | Outbound::ClosePositionSigned(envelope) => {
                vec![serde_json::to_value(envelope)?]
            }
            Outbound::PlaceBet {
                battle_id,
                backed_wallet,
                amount,
                betting_wallet,
            } => vec![
                Value::from(battle_id.as_str()),
                Value::from(backed_wallet.as_str()),
                serde_json::to_value(amount)?,
                Value::from(betting_wallet.as_str()),
            ],
        };
        Ok(Frame::new(self.name(), args))
    }

    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let args = &frame.args;
        match frame.event.as_str() {
            OPEN_POSITION => Ok(Outbound::OpenPosition {
                battle_id: arg(args, OPEN_POSITION, 0)?,
                params: arg(args, OPEN_POSITION, 1)?,
            }),
            CLOSE_POSITION => Ok(Outbound::ClosePosition {
                battle_id: arg(args, CLOSE_POSITION, 0)?,
                position_id: arg(args, CLOSE_POSITION, 1)?,
            }),
            OPEN_POSITION_SIGNED => Ok(Outbound::OpenPositionSigned(arg(
                args,
                OPEN_POSITION_SIGNED,
                0,
            )?)),
            CLOSE_POSITION_SIGNED => Ok(Outbound::ClosePositionSigned(arg(
                args,
                CLOSE_POSITION_SIGNED,
                0,
            )?)),
            PLACE_BET => Ok(Outbound::PlaceBet {
                battle_id: arg(args, PLACE_BET, 0)?,
                backed_wallet: arg(args, PLACE_BET, 1)?,
                amount: arg(args, PLACE_BET, 2)?,
                betting_wallet: arg(args, PLACE_BET, 3)?,
            }),
            other => Err(Error::UnknownEvent(other.to_string())),
        }
    }
}

/// Acknowledgement of an opened or closed position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionAck {
    pub battle_id: String,
    pub position_id: String,
    pub wallet_address: Option<String>,
}

/// Events received by the client.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    BetPlaced(BetPlaced),
    PositionOpened(PositionAck),
    PositionClosed(PositionAck),
    Error(String),
    /// Battle lifecycle broadcasts and anything else this crate does not model.
    Other { event: String, args: Vec<Value> },
}

impl Inbound {
    pub fn to_frame(&self) -> Result<Frame> {
        Ok(match self {
            Inbound::BetPlaced(placed) => Frame::new(BET_PLACED, vec![serde_json::to_value(placed)?]),
            Inbound::PositionOpened(ack) => {
                Frame::new(POSITION_OPENED, vec![serde_json::to_value(ack)?])
            }
            Inbound::PositionClosed(ack) => {
                Frame::new(POSITION_CLOSED, vec![serde_json::to_value(ack)?])
            }
            Inbound::Error(message) => Frame::new(ERROR, vec![Value::from(message.as_str())]),
            Inbound::Other { event, args } => Frame::new(event.clone(), args.clone()),
        })
    }

    pub fn from_frame(frame: Frame) -> Result<Self> {
        let Frame { event, args } = frame;
        match event.as_str() {
            BET_PLACED => Ok(Inbound::BetPlaced(arg(&args, BET_PLACED, 0)?)),
            POSITION_OPENED => Ok(Inbound::PositionOpened(arg(&args, POSITION_OPENED, 0)?)),
            POSITION_CLOSED => Ok(Inbound::PositionClosed(arg(&args, POSITION_CLOSED, 0)?)),
            ERROR => {
                // Servers send either a bare string or `{ "message": ... }`.
                let message = match args.first() {
                    Some(Value::String(message)) => message.clone(),
                    Some(Value::Object(map)) => map
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown error")
                        .to_string(),
                    _ => "unknown error".to_string(),
                };
                Ok(Inbound::Error(message))
            }
            _ => Ok(Inbound::Other {
                event: event.clone(),
                args,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Leverage, Side, TradeIntentMessage};
    use serde_json::json;

    #[test]
    fn test_place_bet_is_positional() {
        let frame = Outbound::PlaceBet {
            battle_id: "battle-1".into(),
            backed_wallet: "Backed".into(),
            amount: 0.25,
            betting_wallet: "Bettor".into(),
        }
        .to_frame()
        .unwrap();
        assert_eq!(
            frame.encode().unwrap(),
            r#"["place_bet","battle-1","Backed",0.25,"Bettor"]"#
        );
    }

    #[test]
    fn test_signed_frame_decodes() {
        let params = PositionParams {
            asset: "BTC".into(),
            side: Side::Short,
            leverage: Leverage::X5,
            size: 100.0,
        };
        let envelope = SignedTradeEnvelope {
            message: TradeIntentMessage::open("b", &params, 10, 1),
            signature: "sig".into(),
            wallet_address: "wallet".into(),
        };
        let outbound = Outbound::OpenPositionSigned(envelope);
        let text = outbound.to_frame().unwrap().encode().unwrap();
        assert!(text.starts_with(r#"["open_position_signed",{"message":"#));

        let decoded = Outbound::from_frame(&Frame::decode(&text).unwrap()).unwrap();
        assert_eq!(decoded, outbound);
        assert!(decoded.is_signed());
    }

    #[test]
    fn test_missing_argument() {
        let frame = Frame::new(CLOSE_POSITION, vec![json!("battle-1")]);
        assert!(matches!(
            Outbound::from_frame(&frame),
            Err(Error::MissingArgument {
                event: CLOSE_POSITION,
                index: 1
            })
        ));
    }

    #[test]
    fn test_inbound_decoding() {
        let error = Frame::decode(r#"["error","Betting is closed"]"#).unwrap();
        assert_eq!(
            Inbound::from_frame(error).unwrap(),
            Inbound::Error("Betting is closed".into())
        );

        let error = Frame::decode(r#"["error",{"message":"Insufficient balance"}]"#).unwrap();
        assert_eq!(
            Inbound::from_frame(error).unwrap(),
            Inbound::Error("Insufficient balance".into())
        );

        let placed = Frame::decode(
            r#"["bet_placed",{"battleId":"b","backedWallet":"x","amount":0.1,"bettingWallet":"y"}]"#,
        )
        .unwrap();
        assert!(matches!(
            Inbound::from_frame(placed).unwrap(),
            Inbound::BetPlaced(BetPlaced { amount, .. }) if amount == 0.1
        ));

        let other = Frame::decode(r#"["battle_update",{"status":"active"}]"#).unwrap();
        assert!(matches!(
            Inbound::from_frame(other).unwrap(),
            Inbound::Other { event, .. } if event == "battle_update"
        ));
    }

    #[test]
    fn test_malformed_frames() {
        assert!(Frame::decode("[]").is_err());
        assert!(Frame::decode("[1, 2]").is_err());
        assert!(Frame::decode(r#"{"event":"x"}"#).is_err());
        assert!(matches!(
            Outbound::from_frame(&Frame::new("nope", vec![])),
            Err(Error::UnknownEvent(_))
        ));
    }
}
