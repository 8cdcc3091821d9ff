//! In-memory stand-ins for wallets and the battle authority connection.

use crate::{
    signer::{SignError, SignFuture},
    Channel, Error, LocalWallet, Result, SigningCapability,
};
use degendome_types::{BetPlaced, Inbound, Outbound};
use ed25519_dalek::SigningKey;
use futures::FutureExt;
use rand::{rngs::StdRng, SeedableRng};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex, PoisonError,
};
use tokio::sync::broadcast;

/// Creates a deterministic wallet for tests.
pub fn create_wallet(seed: u64) -> LocalWallet {
    let mut rng = StdRng::seed_from_u64(seed);
    LocalWallet::from_signing_key(SigningKey::generate(&mut rng))
}

/// Wallet that is connected but refuses every signature request.
pub struct DecliningWallet {
    address: Option<String>,
}

impl DecliningWallet {
    pub fn new(address: &str) -> Self {
        Self {
            address: Some(address.to_string()),
        }
    }

    /// A wallet extension that is installed but has no account connected.
    pub fn anonymous() -> Self {
        Self { address: None }
    }
}

impl SigningCapability for DecliningWallet {
    fn identity(&self) -> Option<String> {
        self.address.clone()
    }

    fn sign<'a>(&'a self, _message: &'a [u8]) -> SignFuture<'a> {
        async { Err(SignError::Declined) }.boxed()
    }
}

type Responder = Box<dyn Fn(&Outbound) -> Vec<Inbound> + Send + Sync>;

/// [Channel] that records every emitted event.
///
/// An optional responder produces the inbound events the authority would send
/// back; they are broadcast before `emit` returns.
pub struct RecordingChannel {
    sent: Mutex<Vec<Outbound>>,
    inbound: broadcast::Sender<Inbound>,
    responder: Option<Responder>,
    closed: AtomicBool,
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingChannel {
    pub fn new() -> Self {
        let (inbound, _) = broadcast::channel(64);
        Self {
            sent: Mutex::new(Vec::new()),
            inbound,
            responder: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_responder(
        responder: impl Fn(&Outbound) -> Vec<Inbound> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Self::new()
        }
    }

    /// Acknowledges every `place_bet` with a matching `bet_placed`.
    pub fn acknowledging_bets() -> Self {
        Self::with_responder(|event| match event {
            Outbound::PlaceBet {
                battle_id,
                backed_wallet,
                amount,
                betting_wallet,
            } => vec![Inbound::BetPlaced(BetPlaced {
                battle_id: battle_id.clone(),
                backed_wallet: backed_wallet.clone(),
                amount: *amount,
                betting_wallet: betting_wallet.clone(),
            })],
            _ => Vec::new(),
        })
    }

    /// Answers every `place_bet` with an `error` carrying `message`.
    pub fn rejecting_bets(message: &str) -> Self {
        let message = message.to_string();
        Self::with_responder(move |event| match event {
            Outbound::PlaceBet { .. } => vec![Inbound::Error(message.clone())],
            _ => Vec::new(),
        })
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Deliver an inbound event to current subscribers.
    pub fn push(&self, event: Inbound) {
        let _ = self.inbound.send(event);
    }

    /// Make every later `emit` fail as if the socket dropped.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Channel for RecordingChannel {
    fn emit(&self, event: Outbound) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }
        let responses = self
            .responder
            .as_ref()
            .map(|respond| respond(&event))
            .unwrap_or_default();
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(event);
        for response in responses {
            self.push(response);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<Inbound> {
        self.inbound.subscribe()
    }
}
