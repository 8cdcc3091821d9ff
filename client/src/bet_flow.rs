//! Spectator bet placement.
//!
//! ```text
//! idle -> amount_selected -> confirming -> placing -> success -> idle
//!                  ^              |                \-> error  -> idle
//!                  \-- cancel ----/
//! ```
//!
//! `success` and `error` return to `idle` on their own after
//! [RECOVERY_DELAY]. A placement is awaited by a task the [BetFlow] owns, so
//! dropping the future returned by [BetFlow::confirm_bet] never strands the
//! machine in `placing`. Every transition cancels a pending recovery and any
//! placement still in flight, so late callbacks can never move the machine.

use crate::{Channel, Error};
use degendome_types::{
    bet::{self, check_amount, quick_amount, PRESET_AMOUNTS},
    BetPlaced, FighterSide, Inbound, Outbound, PendingBet, QuickSize,
};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        oneshot,
    },
    task::JoinHandle,
    time::{error::Elapsed, sleep, timeout},
};
use tracing::{debug, info, warn};

/// How long to wait for the authority to acknowledge a bet.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `success` and `error` are displayed before returning to `idle`.
pub const RECOVERY_DELAY: Duration = Duration::from_secs(2);

pub const CONNECT_WALLET: &str = "Connect wallet to bet";
pub const SELECT_AMOUNT: &str = "Select a bet amount";
pub const NO_PENDING_BET: &str = "No bet to confirm";
pub const CONFIRM_TIMED_OUT: &str = "Bet confirmation timed out";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BetFlowState {
    Idle,
    AmountSelected,
    Confirming,
    Placing,
    Success,
    Error,
}

impl BetFlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetFlowState::Idle => "idle",
            BetFlowState::AmountSelected => "amount_selected",
            BetFlowState::Confirming => "confirming",
            BetFlowState::Placing => "placing",
            BetFlowState::Success => "success",
            BetFlowState::Error => "error",
        }
    }
}

impl fmt::Display for BetFlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    SelectAmount,
    InitiateSwipeBet,
    ConfirmBet,
    CancelBet,
}

/// A call the state machine refused without changing state.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Rejected {
    #[error("{operation:?} is not allowed while {state}")]
    InvalidTransition {
        state: BetFlowState,
        operation: Operation,
    },
    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
    #[error("no preset amount at index {0}")]
    UnknownPreset(usize),
    #[error("balance of {0} SOL cannot cover the minimum bet")]
    InsufficientBalance(f64),
}

/// Point-in-time view of the state machine.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub state: BetFlowState,
    pub selected_amount: f64,
    pub pending_bet: Option<PendingBet>,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub struct BetConfig {
    pub battle_id: String,
    /// First-time bettors start from a smaller default amount.
    pub first_time: bool,
    pub confirm_timeout: Duration,
    pub recovery_delay: Duration,
}

impl BetConfig {
    pub fn new(battle_id: impl Into<String>, first_time: bool) -> Self {
        Self {
            battle_id: battle_id.into(),
            first_time,
            confirm_timeout: CONFIRM_TIMEOUT,
            recovery_delay: RECOVERY_DELAY,
        }
    }
}

struct Inner {
    state: BetFlowState,
    selected_amount: f64,
    pending: Option<PendingBet>,
    error: Option<String>,
    wallet: Option<String>,

    /// Bumped on every transition; async work started under an older epoch
    /// is discarded.
    epoch: u64,
    recovery: Option<JoinHandle<()>>,
    placement: Option<JoinHandle<()>>,
}

impl Inner {
    fn enter(&mut self, state: BetFlowState) {
        self.cancel_tasks();
        self.epoch += 1;
        debug!(from = %self.state, to = %state, epoch = self.epoch, "bet flow transition");
        self.state = state;
    }

    fn cancel_tasks(&mut self) {
        if let Some(recovery) = self.recovery.take() {
            recovery.abort();
        }
        if let Some(placement) = self.placement.take() {
            placement.abort();
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            selected_amount: self.selected_amount,
            pending_bet: self.pending.clone(),
            error: self.error.clone(),
        }
    }

    fn reject(&self, operation: Operation) -> Rejected {
        debug!(state = %self.state, ?operation, "rejected bet flow operation");
        Rejected::InvalidTransition {
            state: self.state,
            operation,
        }
    }
}

/// State reachable from the tasks a [BetFlow] spawns.
struct Shared {
    config: BetConfig,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fail(self: &Arc<Self>, inner: &mut Inner, message: String) {
        warn!(battle_id = %self.config.battle_id, from = %inner.state, error = %message, "bet failed");
        inner.enter(BetFlowState::Error);
        inner.error = Some(message);
        self.schedule_recovery(inner);
    }

    fn schedule_recovery(self: &Arc<Self>, inner: &mut Inner) {
        let epoch = inner.epoch;
        let delay = self.config.recovery_delay;
        let shared = Arc::downgrade(self);
        inner.recovery = Some(tokio::spawn(async move {
            sleep(delay).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut inner = shared.lock();
            if inner.epoch != epoch {
                return;
            }
            // Detach our own handle so the transition below does not abort us.
            inner.recovery = None;
            inner.enter(BetFlowState::Idle);
            inner.pending = None;
            inner.error = None;
        }));
    }

    /// Apply the outcome of the placement started under `epoch`.
    fn settle(
        self: &Arc<Self>,
        epoch: u64,
        outcome: Result<std::result::Result<BetPlaced, String>, Elapsed>,
    ) -> BetFlowState {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            debug!(battle_id = %self.config.battle_id, state = %inner.state, "discarding superseded bet outcome");
            return inner.state;
        }
        inner.placement = None;
        match outcome {
            Ok(Ok(placed)) => {
                info!(battle_id = %self.config.battle_id, amount = placed.amount, "bet placed");
                inner.enter(BetFlowState::Success);
                self.schedule_recovery(&mut inner);
            }
            Ok(Err(message)) => self.fail(&mut inner, message),
            Err(_) => self.fail(&mut inner, CONFIRM_TIMED_OUT.to_string()),
        }
        inner.state
    }
}

/// State machine driving one spectator's bets on one battle.
///
/// Must be used from within a Tokio runtime. Dropping it cancels any pending
/// recovery timer and any placement in flight.
pub struct BetFlow {
    default_amount: f64,
    channel: Arc<dyn Channel>,
    shared: Arc<Shared>,
}

impl Drop for BetFlow {
    fn drop(&mut self) {
        self.shared.lock().cancel_tasks();
    }
}

impl BetFlow {
    pub fn new(config: BetConfig, channel: Arc<dyn Channel>) -> Self {
        let default_amount = bet::default_amount(config.first_time);
        Self {
            default_amount,
            channel,
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(Inner {
                    state: BetFlowState::Idle,
                    selected_amount: default_amount,
                    pending: None,
                    error: None,
                    wallet: None,
                    epoch: 0,
                    recovery: None,
                    placement: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.lock()
    }

    pub fn battle_id(&self) -> &str {
        &self.shared.config.battle_id
    }

    pub fn default_amount(&self) -> f64 {
        self.default_amount
    }

    pub fn state(&self) -> BetFlowState {
        self.lock().state
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }

    /// Connect (or with `None`, disconnect) the betting wallet.
    pub fn set_wallet(&self, wallet: Option<String>) {
        self.lock().wallet = wallet;
    }

    pub fn select_amount(&self, amount: f64) -> Result<BetFlowState, Rejected> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(Rejected::InvalidAmount(amount));
        }
        let mut inner = self.lock();
        if inner.state == BetFlowState::Placing {
            return Err(inner.reject(Operation::SelectAmount));
        }
        inner.enter(BetFlowState::AmountSelected);
        inner.selected_amount = amount;
        inner.pending = None;
        inner.error = None;
        Ok(inner.state)
    }

    /// Select one of [PRESET_AMOUNTS].
    pub fn select_preset(&self, index: usize) -> Result<BetFlowState, Rejected> {
        let amount = *PRESET_AMOUNTS
            .get(index)
            .ok_or(Rejected::UnknownPreset(index))?;
        self.select_amount(amount)
    }

    /// Select a share of `balance`, see [quick_amount].
    pub fn select_quick(&self, balance: f64, size: QuickSize) -> Result<BetFlowState, Rejected> {
        let amount = quick_amount(balance, size).ok_or(Rejected::InsufficientBalance(balance))?;
        self.select_amount(amount)
    }

    /// Record the fighter a swipe backs and ask for confirmation.
    pub fn initiate_swipe_bet(
        &self,
        side: FighterSide,
        fighter_wallet: &str,
        fighter_name: &str,
    ) -> Result<BetFlowState, Rejected> {
        let mut inner = self.lock();
        if !matches!(
            inner.state,
            BetFlowState::Idle | BetFlowState::AmountSelected | BetFlowState::Error
        ) {
            return Err(inner.reject(Operation::InitiateSwipeBet));
        }
        if inner.wallet.is_none() {
            self.shared.fail(&mut inner, CONNECT_WALLET.to_string());
            return Ok(inner.state);
        }
        let amount = inner.selected_amount;
        if amount <= 0.0 {
            self.shared.fail(&mut inner, SELECT_AMOUNT.to_string());
            return Ok(inner.state);
        }
        if let Err(err) = check_amount(amount) {
            self.shared.fail(&mut inner, amount_message(&err));
            return Ok(inner.state);
        }

        inner.enter(BetFlowState::Confirming);
        inner.error = None;
        inner.pending = Some(PendingBet {
            amount,
            side,
            fighter: fighter_name.to_string(),
            fighter_wallet: fighter_wallet.to_string(),
        });
        info!(
            battle_id = %self.battle_id(),
            amount,
            fighter = fighter_name,
            "bet awaiting confirmation"
        );
        Ok(inner.state)
    }

    /// Submit the pending bet and wait for the authority's answer.
    ///
    /// Resolves once the machine has reached `success` or `error` (or, if the
    /// flow was reset meanwhile, whatever state it is in now). The answer is
    /// awaited by a task owned by this flow: dropping the returned future
    /// stops the wait for the caller only, and the machine still settles.
    pub async fn confirm_bet(&self) -> Result<BetFlowState, Rejected> {
        let (epoch, pending, wallet, events) = {
            let mut inner = self.lock();
            if inner.state != BetFlowState::Confirming {
                return Err(inner.reject(Operation::ConfirmBet));
            }
            let Some(pending) = inner.pending.clone() else {
                self.shared.fail(&mut inner, NO_PENDING_BET.to_string());
                return Ok(inner.state);
            };
            let Some(wallet) = inner.wallet.clone() else {
                self.shared.fail(&mut inner, CONNECT_WALLET.to_string());
                return Ok(inner.state);
            };
            inner.enter(BetFlowState::Placing);

            // Subscribe before emitting so the acknowledgement cannot be missed.
            let events = self.channel.subscribe();
            (inner.epoch, pending, wallet, events)
        };

        let battle_id = self.battle_id().to_string();
        info!(
            %battle_id,
            amount = pending.amount,
            backed = %pending.fighter_wallet,
            "placing bet"
        );
        let emitted = self.channel.emit(Outbound::PlaceBet {
            battle_id: battle_id.clone(),
            backed_wallet: pending.fighter_wallet.clone(),
            amount: pending.amount,
            betting_wallet: wallet.clone(),
        });

        let (done_tx, done_rx) = oneshot::channel();
        {
            let mut inner = self.lock();
            if inner.epoch != epoch {
                return Ok(inner.state);
            }
            if let Err(err) = emitted {
                self.shared.fail(&mut inner, err.to_string());
                return Ok(inner.state);
            }
            inner.placement = Some(tokio::spawn(await_placement(
                Arc::downgrade(&self.shared),
                epoch,
                battle_id,
                wallet,
                events,
                done_tx,
            )));
        }

        // A dropped sender means the placement was superseded.
        match done_rx.await {
            Ok(state) => Ok(state),
            Err(_) => Ok(self.state()),
        }
    }

    /// Drop the pending bet, keeping the selected amount.
    pub fn cancel_bet(&self) -> Result<BetFlowState, Rejected> {
        let mut inner = self.lock();
        if inner.state != BetFlowState::Confirming {
            return Err(inner.reject(Operation::CancelBet));
        }
        inner.enter(BetFlowState::AmountSelected);
        inner.pending = None;
        Ok(inner.state)
    }

    /// Return to `idle` from anywhere, restoring the default amount.
    pub fn reset(&self) -> BetFlowState {
        let mut inner = self.lock();
        inner.enter(BetFlowState::Idle);
        inner.selected_amount = self.default_amount;
        inner.pending = None;
        inner.error = None;
        inner.state
    }
}

async fn await_placement(
    shared: Weak<Shared>,
    epoch: u64,
    battle_id: String,
    wallet: String,
    mut events: broadcast::Receiver<Inbound>,
    done: oneshot::Sender<BetFlowState>,
) {
    let Some(confirm_timeout) = shared.upgrade().map(|shared| shared.config.confirm_timeout) else {
        return;
    };
    let outcome = timeout(
        confirm_timeout,
        wait_for_outcome(&mut events, &battle_id, &wallet),
    )
    .await;
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let state = shared.settle(epoch, outcome);
    let _ = done.send(state);
}

fn amount_message(err: &degendome_types::Error) -> String {
    match err {
        degendome_types::Error::BetBelowMinimum { min, .. } => format!("Minimum bet is {min} SOL"),
        degendome_types::Error::BetAboveMaximum { max, .. } => format!("Maximum bet is {max} SOL"),
        _ => SELECT_AMOUNT.to_string(),
    }
}

/// Any `error` frame fails the bet, since the authority does not say which
/// request it rejects. See [Channel] for sharing a channel with trades.
async fn wait_for_outcome(
    events: &mut broadcast::Receiver<Inbound>,
    battle_id: &str,
    wallet: &str,
) -> Result<BetPlaced, String> {
    loop {
        match events.recv().await {
            Ok(Inbound::BetPlaced(placed))
                if placed.battle_id == battle_id && placed.betting_wallet == wallet =>
            {
                return Ok(placed)
            }
            Ok(Inbound::Error(message)) => return Err(message),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "bet flow lagged behind inbound events");
            }
            Err(RecvError::Closed) => return Err(Error::ConnectionClosed.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::RecordingChannel;

    const BATTLE: &str = "battle-1";
    const BETTOR: &str = "Bettor1111111111111111111111111111111111111";
    const FIGHTER: &str = "Fighter111111111111111111111111111111111111";

    fn flow(channel: RecordingChannel) -> (BetFlow, Arc<RecordingChannel>) {
        let channel = Arc::new(channel);
        let flow = BetFlow::new(BetConfig::new(BATTLE, false), channel.clone());
        flow.set_wallet(Some(BETTOR.to_string()));
        (flow, channel)
    }

    fn swipe(flow: &BetFlow) -> Result<BetFlowState, Rejected> {
        flow.initiate_swipe_bet(FighterSide::Left, FIGHTER, "degen")
    }

    async fn past_recovery() {
        sleep(RECOVERY_DELAY + Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path() {
        let (flow, channel) = flow(RecordingChannel::acknowledging_bets());
        assert_eq!(flow.state(), BetFlowState::Idle);

        assert_eq!(flow.select_amount(0.1), Ok(BetFlowState::AmountSelected));
        assert_eq!(swipe(&flow), Ok(BetFlowState::Confirming));
        assert_eq!(
            flow.snapshot().pending_bet,
            Some(PendingBet {
                amount: 0.1,
                side: FighterSide::Left,
                fighter: "degen".into(),
                fighter_wallet: FIGHTER.into(),
            })
        );

        assert_eq!(flow.confirm_bet().await, Ok(BetFlowState::Success));
        assert_eq!(
            channel.sent(),
            vec![Outbound::PlaceBet {
                battle_id: BATTLE.into(),
                backed_wallet: FIGHTER.into(),
                amount: 0.1,
                betting_wallet: BETTOR.into(),
            }]
        );

        past_recovery().await;
        let snapshot = flow.snapshot();
        assert_eq!(snapshot.state, BetFlowState::Idle);
        assert_eq!(snapshot.pending_bet, None);
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_wallet() {
        let (flow, channel) = flow(RecordingChannel::acknowledging_bets());
        flow.set_wallet(None);

        assert_eq!(swipe(&flow), Ok(BetFlowState::Error));
        assert_eq!(flow.snapshot().error.as_deref(), Some(CONNECT_WALLET));

        past_recovery().await;
        let snapshot = flow.snapshot();
        assert_eq!(snapshot.state, BetFlowState::Idle);
        assert_eq!(snapshot.error, None);
        assert!(channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_positive_amount() {
        let (flow, _) = flow(RecordingChannel::new());
        flow.select_amount(0.0).unwrap();
        assert_eq!(swipe(&flow), Ok(BetFlowState::Error));
        assert_eq!(flow.snapshot().error.as_deref(), Some(SELECT_AMOUNT));
        assert_eq!(flow.snapshot().pending_bet, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforces_bet_bounds() {
        let (flow, _) = flow(RecordingChannel::new());
        flow.select_amount(0.001).unwrap();
        assert_eq!(swipe(&flow), Ok(BetFlowState::Error));
        assert_eq!(
            flow.snapshot().error.as_deref(),
            Some("Minimum bet is 0.01 SOL")
        );

        flow.select_amount(250.0).unwrap();
        assert_eq!(swipe(&flow), Ok(BetFlowState::Error));
        assert_eq!(
            flow.snapshot().error.as_deref(),
            Some("Maximum bet is 100 SOL")
        );
    }

    #[test]
    fn test_rejects_invalid_amounts() {
        let (flow, _) = flow(RecordingChannel::new());
        assert_eq!(flow.select_amount(-1.0), Err(Rejected::InvalidAmount(-1.0)));
        assert!(matches!(
            flow.select_amount(f64::NAN),
            Err(Rejected::InvalidAmount(_))
        ));
        assert_eq!(flow.state(), BetFlowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_preserves_amount() {
        let (flow, channel) = flow(RecordingChannel::acknowledging_bets());
        flow.select_amount(0.25).unwrap();
        swipe(&flow).unwrap();

        assert_eq!(flow.cancel_bet(), Ok(BetFlowState::AmountSelected));
        let snapshot = flow.snapshot();
        assert_eq!(snapshot.selected_amount, 0.25);
        assert_eq!(snapshot.pending_bet, None);
        assert!(channel.sent().is_empty());

        assert_eq!(
            flow.cancel_bet(),
            Err(Rejected::InvalidTransition {
                state: BetFlowState::AmountSelected,
                operation: Operation::CancelBet,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirm_times_out() {
        let (flow, channel) = flow(RecordingChannel::new());
        swipe(&flow).unwrap();

        let started = tokio::time::Instant::now();
        assert_eq!(flow.confirm_bet().await, Ok(BetFlowState::Error));
        assert!(started.elapsed() >= CONFIRM_TIMEOUT);
        assert_eq!(flow.snapshot().error.as_deref(), Some(CONFIRM_TIMED_OUT));
        assert_eq!(channel.sent().len(), 1);

        past_recovery().await;
        assert_eq!(flow.state(), BetFlowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_rejection_is_surfaced() {
        let (flow, _) = flow(RecordingChannel::rejecting_bets("Betting is closed"));
        swipe(&flow).unwrap();
        assert_eq!(flow.confirm_bet().await, Ok(BetFlowState::Error));
        assert_eq!(flow.snapshot().error.as_deref(), Some("Betting is closed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_other_bets() {
        let (flow, channel) = flow(RecordingChannel::new());
        swipe(&flow).unwrap();

        let confirm = flow.confirm_bet();
        let deliver = async {
            tokio::task::yield_now().await;
            channel.push(Inbound::BetPlaced(BetPlaced {
                battle_id: BATTLE.into(),
                backed_wallet: FIGHTER.into(),
                amount: 0.1,
                betting_wallet: "SomeoneElse".into(),
            }));
            channel.push(Inbound::Other {
                event: "battle_update".into(),
                args: vec![],
            });
            channel.push(Inbound::BetPlaced(BetPlaced {
                battle_id: BATTLE.into(),
                backed_wallet: FIGHTER.into(),
                amount: 0.1,
                betting_wallet: BETTOR.into(),
            }));
        };
        let (state, _) = tokio::join!(confirm, deliver);
        assert_eq!(state, Ok(BetFlowState::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_placement_in_flight() {
        let (flow, channel) = flow(RecordingChannel::new());
        swipe(&flow).unwrap();

        let first = flow.confirm_bet();
        let second = async {
            tokio::task::yield_now().await;
            flow.confirm_bet().await
        };
        let (first, second) = tokio::join!(first, second);
        assert_eq!(first, Ok(BetFlowState::Error));
        assert_eq!(
            second,
            Err(Rejected::InvalidTransition {
                state: BetFlowState::Placing,
                operation: Operation::ConfirmBet,
            })
        );
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_discards_inflight_outcome() {
        let (flow, channel) = flow(RecordingChannel::new());
        swipe(&flow).unwrap();

        let confirm = flow.confirm_bet();
        let interrupt = async {
            tokio::task::yield_now().await;
            assert_eq!(flow.state(), BetFlowState::Placing);
            flow.reset();
            channel.push(Inbound::BetPlaced(BetPlaced {
                battle_id: BATTLE.into(),
                backed_wallet: FIGHTER.into(),
                amount: 0.1,
                betting_wallet: BETTOR.into(),
            }));
        };
        let (state, _) = tokio::join!(confirm, interrupt);
        assert_eq!(state, Ok(BetFlowState::Idle));
        assert_eq!(flow.snapshot().pending_bet, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_from_every_state() {
        let (flow, _) = flow(RecordingChannel::acknowledging_bets());
        let default = flow.default_amount();
        let expect_reset = |flow: &BetFlow| {
            assert_eq!(flow.reset(), BetFlowState::Idle);
            assert_eq!(
                flow.snapshot(),
                Snapshot {
                    state: BetFlowState::Idle,
                    selected_amount: default,
                    pending_bet: None,
                    error: None,
                }
            );
        };

        // idle
        expect_reset(&flow);

        // amount_selected
        flow.select_amount(0.5).unwrap();
        expect_reset(&flow);

        // confirming
        flow.select_amount(0.5).unwrap();
        swipe(&flow).unwrap();
        expect_reset(&flow);

        // success
        swipe(&flow).unwrap();
        assert_eq!(flow.confirm_bet().await, Ok(BetFlowState::Success));
        expect_reset(&flow);

        // error
        flow.set_wallet(None);
        swipe(&flow).unwrap();
        assert_eq!(flow.state(), BetFlowState::Error);
        expect_reset(&flow);
        flow.set_wallet(Some(BETTOR.to_string()));

        // placing
        let silent = Arc::new(RecordingChannel::new());
        let stuck = BetFlow::new(BetConfig::new(BATTLE, false), silent);
        stuck.set_wallet(Some(BETTOR.to_string()));
        swipe(&stuck).unwrap();
        let confirm = stuck.confirm_bet();
        let interrupt = async {
            tokio::task::yield_now().await;
            assert_eq!(stuck.state(), BetFlowState::Placing);
            expect_reset(&stuck);
        };
        let (state, _) = tokio::join!(confirm, interrupt);
        assert_eq!(state, Ok(BetFlowState::Idle));

        // Cancelled recovery timers never fire later.
        past_recovery().await;
        assert_eq!(flow.state(), BetFlowState::Idle);
        assert_eq!(stuck.state(), BetFlowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_cancels_recovery() {
        let (flow, _) = flow(RecordingChannel::new());
        flow.set_wallet(None);
        swipe(&flow).unwrap();
        assert_eq!(flow.state(), BetFlowState::Error);

        // Leave `error` before the timer fires; the timer must not move us.
        sleep(Duration::from_millis(500)).await;
        flow.select_amount(0.25).unwrap();
        past_recovery().await;
        let snapshot = flow.snapshot();
        assert_eq!(snapshot.state, BetFlowState::AmountSelected);
        assert_eq!(snapshot.selected_amount, 0.25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_from_error() {
        let (flow, _) = flow(RecordingChannel::acknowledging_bets());
        flow.set_wallet(None);
        swipe(&flow).unwrap();
        flow.set_wallet(Some(BETTOR.to_string()));
        assert_eq!(swipe(&flow), Ok(BetFlowState::Confirming));
        assert_eq!(flow.snapshot().error, None);

        // Recovery scheduled by the first failure was cancelled.
        past_recovery().await;
        assert_eq!(flow.state(), BetFlowState::Confirming);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_transitions_leave_state() {
        let (flow, _) = flow(RecordingChannel::acknowledging_bets());
        assert_eq!(
            flow.confirm_bet().await,
            Err(Rejected::InvalidTransition {
                state: BetFlowState::Idle,
                operation: Operation::ConfirmBet,
            })
        );

        swipe(&flow).unwrap();
        assert_eq!(
            swipe(&flow),
            Err(Rejected::InvalidTransition {
                state: BetFlowState::Confirming,
                operation: Operation::InitiateSwipeBet,
            })
        );

        flow.confirm_bet().await.unwrap();
        assert_eq!(
            swipe(&flow),
            Err(Rejected::InvalidTransition {
                state: BetFlowState::Success,
                operation: Operation::InitiateSwipeBet,
            })
        );
        assert_eq!(flow.state(), BetFlowState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_channel_fails_bet() {
        let (flow, channel) = flow(RecordingChannel::acknowledging_bets());
        channel.close();
        swipe(&flow).unwrap();
        assert_eq!(flow.confirm_bet().await, Ok(BetFlowState::Error));
        assert_eq!(
            flow.snapshot().error,
            Some(Error::ConnectionClosed.to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_recovery() {
        let (flow, channel) = flow(RecordingChannel::new());
        flow.set_wallet(None);
        swipe(&flow).unwrap();
        let weak = Arc::downgrade(&flow.shared);
        drop(flow);
        past_recovery().await;
        assert!(weak.upgrade().is_none());
        drop(channel);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_confirm_still_settles() {
        let (flow, channel) = flow(RecordingChannel::new());
        swipe(&flow).unwrap();

        // The caller gives up long before the confirmation timeout.
        assert!(timeout(Duration::from_secs(1), flow.confirm_bet())
            .await
            .is_err());
        assert_eq!(flow.state(), BetFlowState::Placing);

        sleep(CONFIRM_TIMEOUT).await;
        let snapshot = flow.snapshot();
        assert_eq!(snapshot.state, BetFlowState::Error);
        assert_eq!(snapshot.error.as_deref(), Some(CONFIRM_TIMED_OUT));

        past_recovery().await;
        assert_eq!(flow.state(), BetFlowState::Idle);
        assert_eq!(flow.select_amount(0.25), Ok(BetFlowState::AmountSelected));
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_confirm_receives_late_ack() {
        let (flow, channel) = flow(RecordingChannel::new());
        swipe(&flow).unwrap();
        assert!(timeout(Duration::from_secs(1), flow.confirm_bet())
            .await
            .is_err());

        channel.push(Inbound::BetPlaced(BetPlaced {
            battle_id: BATTLE.into(),
            backed_wallet: FIGHTER.into(),
            amount: 0.1,
            betting_wallet: BETTOR.into(),
        }));
        sleep(Duration::from_millis(1)).await;
        assert_eq!(flow.state(), BetFlowState::Success);

        past_recovery().await;
        assert_eq!(flow.state(), BetFlowState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_during_placement() {
        let (flow, channel) = flow(RecordingChannel::new());
        swipe(&flow).unwrap();
        assert!(timeout(Duration::from_secs(1), flow.confirm_bet())
            .await
            .is_err());

        let weak = Arc::downgrade(&flow.shared);
        drop(flow);
        assert!(weak.upgrade().is_none());

        // The aborted placement never fires its timeout against freed state.
        sleep(CONFIRM_TIMEOUT + RECOVERY_DELAY).await;
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_select_preset_and_quick() {
        let (flow, _) = flow(RecordingChannel::acknowledging_bets());
        assert_eq!(flow.select_preset(3), Ok(BetFlowState::AmountSelected));
        assert_eq!(flow.snapshot().selected_amount, PRESET_AMOUNTS[3]);
        assert_eq!(
            flow.select_preset(PRESET_AMOUNTS.len()),
            Err(Rejected::UnknownPreset(PRESET_AMOUNTS.len()))
        );

        assert_eq!(
            flow.select_quick(0.58, QuickSize::Half),
            Ok(BetFlowState::AmountSelected)
        );
        assert_eq!(flow.snapshot().selected_amount, 0.29);
        assert_eq!(
            flow.select_quick(0.005, QuickSize::Max),
            Err(Rejected::InsufficientBalance(0.005))
        );
        assert_eq!(flow.snapshot().selected_amount, 0.29);

        swipe(&flow).unwrap();
        assert_eq!(flow.confirm_bet().await, Ok(BetFlowState::Success));
    }

    #[test]
    fn test_default_amounts() {
        let channel = Arc::new(RecordingChannel::new());
        let first = BetFlow::new(BetConfig::new(BATTLE, true), channel.clone());
        let returning = BetFlow::new(BetConfig::new(BATTLE, false), channel);
        assert_eq!(first.snapshot().selected_amount, bet::FIRST_TIME_DEFAULT_AMOUNT);
        assert_eq!(
            returning.snapshot().selected_amount,
            bet::RETURNING_DEFAULT_AMOUNT
        );
        assert!(first.default_amount() < returning.default_amount());
    }
}
