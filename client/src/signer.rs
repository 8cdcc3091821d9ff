use crate::{Error, Result};
use degendome_types::{encode_address, SignedTradeEnvelope, TradeIntentMessage};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use futures::future::{BoxFuture, FutureExt};
use rand_core::OsRng;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reasons a signing capability may refuse to produce a signature.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    #[error("signature request declined")]
    Declined,
    #[error("signing unavailable")]
    Unavailable,
    #[error("signing failed: {0}")]
    Failed(String),
}

/// Pending result of a [SigningCapability::sign] request.
pub type SignFuture<'a> = BoxFuture<'a, std::result::Result<Vec<u8>, SignError>>;

/// Wallet-provided signing over arbitrary bytes.
///
/// `sign` may wait on the user for an arbitrary amount of time and may reject.
pub trait SigningCapability: Send + Sync {
    /// Address of the connected signer, if any.
    fn identity(&self) -> Option<String>;

    fn sign<'a>(&'a self, message: &'a [u8]) -> SignFuture<'a>;
}

/// Ed25519 keypair held in process.
pub struct LocalWallet {
    key: SigningKey,
    address: String,
}

impl LocalWallet {
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut OsRng))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(&seed))
    }

    /// Load a wallet from a base58-encoded 32 byte seed.
    pub fn from_base58(secret: &str) -> Result<Self> {
        let bytes = bs58::decode(secret.trim())
            .into_vec()
            .map_err(|_| Error::InvalidSecret)?;
        let seed: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidSecret)?;
        Ok(Self::from_seed(seed))
    }

    pub fn from_signing_key(key: SigningKey) -> Self {
        let address = encode_address(&key.verifying_key());
        Self { key, address }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl SigningCapability for LocalWallet {
    fn identity(&self) -> Option<String> {
        Some(self.address.clone())
    }

    fn sign<'a>(&'a self, message: &'a [u8]) -> SignFuture<'a> {
        async move { Ok(self.key.sign(message).to_bytes().to_vec()) }.boxed()
    }
}

/// Produces signed trade envelopes when a signing capability is connected.
#[derive(Clone, Default)]
pub struct TradeSigner {
    capability: Option<Arc<dyn SigningCapability>>,
}

impl TradeSigner {
    pub fn new(capability: Arc<dyn SigningCapability>) -> Self {
        Self {
            capability: Some(capability),
        }
    }

    /// A signer with nothing connected; every trade goes out unsigned.
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn is_available(&self) -> bool {
        self.capability.is_some()
    }

    /// Sign `message`, returning `None` whenever a signature cannot be obtained.
    ///
    /// None of the failure cases are fatal: callers fall back to the unsigned
    /// submission path.
    pub async fn sign_trade(&self, message: TradeIntentMessage) -> Option<SignedTradeEnvelope> {
        let Some(capability) = &self.capability else {
            warn!(battle_id = %message.battle_id, "no signing capability connected");
            return None;
        };
        let Some(wallet_address) = capability.identity() else {
            warn!(battle_id = %message.battle_id, "no signer identity connected");
            return None;
        };
        let bytes = match message.canonical_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(battle_id = %message.battle_id, error = %err, "failed to encode trade");
                return None;
            }
        };
        match capability.sign(&bytes).await {
            Ok(signature) => {
                debug!(
                    battle_id = %message.battle_id,
                    nonce = message.nonce,
                    wallet = %wallet_address,
                    "signed trade"
                );
                Some(SignedTradeEnvelope {
                    message,
                    signature: bs58::encode(signature).into_string(),
                    wallet_address,
                })
            }
            Err(err) => {
                warn!(
                    battle_id = %message.battle_id,
                    nonce = message.nonce,
                    error = %err,
                    "trade signing failed"
                );
                None
            }
        }
    }
}
