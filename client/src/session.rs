use crate::{now_millis, Channel, NonceSequencer, Result, TradeSigner};
use degendome_types::{Leverage, Outbound, PositionParams, Side, TradeIntentMessage};
use std::sync::Arc;
use tracing::{info, warn};

/// Whether trades in a battle carry an economic stake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BattleMode {
    /// Two players with entry fees at stake.
    Duel,
    /// Single-player practice; trades are never signed.
    Practice,
}

/// How a trade left the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Submission {
    Unsigned,
    Signed { nonce: u64 },
}

/// Submits a player's trades for one battle.
///
/// Every call emits exactly one event and returns without waiting for the
/// authority: acknowledgements arrive later as `position_opened`,
/// `position_closed` or `error` on the channel.
pub struct BattleSession {
    battle_id: String,
    mode: BattleMode,
    signer: TradeSigner,
    nonces: Arc<NonceSequencer>,
    channel: Arc<dyn Channel>,
}

impl BattleSession {
    pub fn new(
        battle_id: impl Into<String>,
        mode: BattleMode,
        signer: TradeSigner,
        nonces: Arc<NonceSequencer>,
        channel: Arc<dyn Channel>,
    ) -> Self {
        Self {
            battle_id: battle_id.into(),
            mode,
            signer,
            nonces,
            channel,
        }
    }

    pub fn battle_id(&self) -> &str {
        &self.battle_id
    }

    pub fn mode(&self) -> BattleMode {
        self.mode
    }

    pub async fn open_position(
        &self,
        asset: &str,
        side: Side,
        leverage: Leverage,
        size: f64,
    ) -> Result<Submission> {
        let params = PositionParams {
            asset: asset.to_string(),
            side,
            leverage,
            size,
        };
        params.validate()?;

        if self.mode == BattleMode::Duel && self.signer.is_available() {
            let nonce = self.nonces.next(&self.battle_id);
            let message = TradeIntentMessage::open(&self.battle_id, &params, now_millis(), nonce);
            if let Some(envelope) = self.signer.sign_trade(message).await {
                self.channel.emit(Outbound::OpenPositionSigned(envelope))?;
                info!(battle_id = %self.battle_id, nonce, %asset, %side, %leverage, size, "submitted signed open");
                return Ok(Submission::Signed { nonce });
            }
            warn!(battle_id = %self.battle_id, nonce, "signing failed, submitting unsigned open");
        }

        self.channel.emit(Outbound::OpenPosition {
            battle_id: self.battle_id.clone(),
            params,
        })?;
        info!(battle_id = %self.battle_id, %asset, %side, %leverage, size, "submitted unsigned open");
        Ok(Submission::Unsigned)
    }

    pub async fn close_position(&self, position_id: &str) -> Result<Submission> {
        if position_id.trim().is_empty() {
            return Err(degendome_types::Error::InvalidTrade("position id must not be empty").into());
        }

        if self.mode == BattleMode::Duel && self.signer.is_available() {
            let nonce = self.nonces.next(&self.battle_id);
            let message =
                TradeIntentMessage::close(&self.battle_id, position_id, now_millis(), nonce);
            if let Some(envelope) = self.signer.sign_trade(message).await {
                self.channel.emit(Outbound::ClosePositionSigned(envelope))?;
                info!(battle_id = %self.battle_id, nonce, %position_id, "submitted signed close");
                return Ok(Submission::Signed { nonce });
            }
            warn!(battle_id = %self.battle_id, nonce, "signing failed, submitting unsigned close");
        }

        self.channel.emit(Outbound::ClosePosition {
            battle_id: self.battle_id.clone(),
            position_id: position_id.to_string(),
        })?;
        info!(battle_id = %self.battle_id, %position_id, "submitted unsigned close");
        Ok(Submission::Unsigned)
    }
}
