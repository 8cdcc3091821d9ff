//! Local stand-in for the battle authority.
//!
//! Verifies signed trade intents, enforces per-wallet nonce ordering, and
//! acknowledges positions and spectator bets over the same event frames the
//! production server speaks.

use degendome_types::{
    bet::check_amount, Action, BetPlaced, Inbound, Outbound, PositionAck, SignedTradeEnvelope,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, info, warn};

mod api;
pub use api::Api;

/// Reasons the authority refuses an event. The display text is sent to the
/// client verbatim in an `error` frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Nonce already used")]
    NonceUsed,
    #[error("Invalid trade: {0}")]
    InvalidTrade(String),
    #[error("Battle mismatch")]
    BattleMismatch,
    #[error("Position not found")]
    UnknownPosition,
    #[error("Position belongs to another wallet")]
    NotPositionOwner,
    #[error("Minimum bet is {0} SOL")]
    BetBelowMinimum(f64),
    #[error("Maximum bet is {0} SOL")]
    BetAboveMaximum(f64),
    #[error("Invalid bet amount")]
    InvalidBetAmount,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug, Default)]
pub struct SimulatorConfig {
    /// Delay before a `bet_placed` acknowledgement is sent.
    pub bet_delay: Duration,
    /// Never answer `place_bet`.
    pub silent_bets: bool,
}

#[derive(Clone, Debug)]
struct Position {
    battle_id: String,
    wallet: Option<String>,
}

#[derive(Default)]
struct State {
    /// Highest accepted nonce per `(battle, wallet)`.
    nonces: HashMap<(String, String), u64>,
    positions: HashMap<String, Position>,
    next_position: u64,
    bets: Vec<BetPlaced>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub open_positions: usize,
    pub bets: usize,
}

pub struct Simulator {
    pub config: SimulatorConfig,
    state: Mutex<State>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer one client event.
    ///
    /// Returns `None` when the authority stays silent (see
    /// [SimulatorConfig::silent_bets]); rejections become `error` events.
    pub fn handle(&self, event: Outbound) -> Option<Inbound> {
        let name = event.name();
        let result = match event {
            Outbound::OpenPosition { battle_id, params } => params
                .validate()
                .map_err(|err| Error::InvalidTrade(err.to_string()))
                .map(|()| Inbound::PositionOpened(self.open(battle_id, None))),
            Outbound::ClosePosition {
                battle_id,
                position_id,
            } => self
                .close(&battle_id, &position_id, None)
                .map(Inbound::PositionClosed),
            Outbound::OpenPositionSigned(envelope) | Outbound::ClosePositionSigned(envelope) => {
                self.signed(envelope)
            }
            Outbound::PlaceBet {
                battle_id,
                backed_wallet,
                amount,
                betting_wallet,
            } => {
                if self.config.silent_bets {
                    debug!(%battle_id, amount, "ignoring bet");
                    return None;
                }
                self.bet(BetPlaced {
                    battle_id,
                    backed_wallet,
                    amount,
                    betting_wallet,
                })
                .map(Inbound::BetPlaced)
            }
        };
        Some(result.unwrap_or_else(|err| {
            warn!(event = name, error = %err, "rejected event");
            Inbound::Error(err.to_string())
        }))
    }

    /// Highest nonce accepted for `wallet` in `battle_id`.
    pub fn last_nonce(&self, battle_id: &str, wallet: &str) -> Option<u64> {
        self.lock()
            .nonces
            .get(&(battle_id.to_string(), wallet.to_string()))
            .copied()
    }

    pub fn stats(&self) -> Stats {
        let state = self.lock();
        Stats {
            open_positions: state.positions.len(),
            bets: state.bets.len(),
        }
    }

    fn signed(&self, envelope: SignedTradeEnvelope) -> Result<Inbound> {
        envelope.verify().map_err(|_| Error::InvalidSignature)?;
        let SignedTradeEnvelope {
            message,
            wallet_address,
            ..
        } = envelope;
        message
            .validate()
            .map_err(|err| Error::InvalidTrade(err.to_string()))?;

        // Nonce bookkeeping happens under the same lock as the position update
        // so a rejected trade never advances the nonce.
        let mut state = self.lock();
        let key = (message.battle_id.clone(), wallet_address.clone());
        if state.nonces.get(&key).is_some_and(|last| message.nonce <= *last) {
            return Err(Error::NonceUsed);
        }
        let ack = match message.action {
            Action::Open => Inbound::PositionOpened(Self::open_locked(
                &mut state,
                message.battle_id.clone(),
                Some(wallet_address),
            )),
            Action::Close => {
                let position_id = message.position_id.as_deref().unwrap_or_default();
                Inbound::PositionClosed(Self::close_locked(
                    &mut state,
                    &message.battle_id,
                    position_id,
                    Some(&wallet_address),
                )?)
            }
        };
        state.nonces.insert(key, message.nonce);
        debug!(battle_id = %message.battle_id, nonce = message.nonce, "accepted signed trade");
        Ok(ack)
    }

    fn open(&self, battle_id: String, wallet: Option<String>) -> PositionAck {
        Self::open_locked(&mut self.lock(), battle_id, wallet)
    }

    fn open_locked(state: &mut State, battle_id: String, wallet: Option<String>) -> PositionAck {
        state.next_position += 1;
        let position_id = format!("pos-{}", state.next_position);
        info!(%battle_id, %position_id, signed = wallet.is_some(), "opened position");
        state.positions.insert(
            position_id.clone(),
            Position {
                battle_id: battle_id.clone(),
                wallet: wallet.clone(),
            },
        );
        PositionAck {
            battle_id,
            position_id,
            wallet_address: wallet,
        }
    }

    fn close(&self, battle_id: &str, position_id: &str, wallet: Option<&str>) -> Result<PositionAck> {
        Self::close_locked(&mut self.lock(), battle_id, position_id, wallet)
    }

    fn close_locked(
        state: &mut State,
        battle_id: &str,
        position_id: &str,
        wallet: Option<&str>,
    ) -> Result<PositionAck> {
        let position = state
            .positions
            .get(position_id)
            .ok_or(Error::UnknownPosition)?;
        if position.battle_id != battle_id {
            return Err(Error::BattleMismatch);
        }
        if let (Some(owner), Some(wallet)) = (&position.wallet, wallet) {
            if owner != wallet {
                return Err(Error::NotPositionOwner);
            }
        }
        let position = state
            .positions
            .remove(position_id)
            .ok_or(Error::UnknownPosition)?;
        info!(%battle_id, %position_id, "closed position");
        Ok(PositionAck {
            battle_id: battle_id.to_string(),
            position_id: position_id.to_string(),
            wallet_address: position.wallet,
        })
    }

    fn bet(&self, bet: BetPlaced) -> Result<BetPlaced> {
        check_amount(bet.amount).map_err(|err| match err {
            degendome_types::Error::BetBelowMinimum { min, .. } => Error::BetBelowMinimum(min),
            degendome_types::Error::BetAboveMaximum { max, .. } => Error::BetAboveMaximum(max),
            _ => Error::InvalidBetAmount,
        })?;
        info!(
            battle_id = %bet.battle_id,
            amount = bet.amount,
            backed = %bet.backed_wallet,
            bettor = %bet.betting_wallet,
            "accepted bet"
        );
        self.lock().bets.push(bet.clone());
        Ok(bet)
    }
}
