//! Payment controller
//!
//! [`PaymentController`] owns at most one live [`Session`] together with its
//! [`PollingContext`]. It validates `open` options, runs the single wallet send
//! a session may have outstanding, applies reconciler outcomes and fires the
//! success callback.
//!
//! All state sits behind one async mutex that is never held across a wallet
//! call or a ledger fetch. Results that come back after their session was
//! closed or superseded are recognised by session id (wallet sends) or by
//! session id plus polling context id (reconciler outcomes) and dropped.
//!
//! Several controllers can coexist; they share nothing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, oneshot, Mutex};

use crate::amount::{format_kas, parse_amount};
use crate::config::EngineConfig;
use crate::ledger::LedgerApi;
use crate::reconciler::{PollOutcome, PollingContext, Reconciler};
use crate::session::{
    PaymentRequest, PaymentSource, Session, SessionEffect, SessionEvent, SessionId, SessionInput,
    SessionView, Theme,
};
use crate::uri::{explorer_tx_url, payment_uri, qr_image_url};
use crate::wallet::{PickerOption, Platform, WalletKind, WalletRegistry};
use crate::{KaspaAddress, KaspaPayError, KaspaPayResult, DEFAULT_ITEM_LABEL};

/// Observer channel capacity; slow subscribers see `Lagged`.
const EVENT_CHANNEL_CAPACITY: usize = 64;

type SuccessCallback = Box<dyn FnOnce(PaymentSuccess) + Send + 'static>;

/// Passed to the success callback, once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentSuccess {
    pub session_id: SessionId,
    pub txid: String,
    pub source: PaymentSource,
}

/// Result of [`PaymentController::select_wallet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletOutcome {
    /// The wallet returned a transaction id and the session is paid
    Paid { txid: String },
    /// The send failed; the session is back in the picker and polling goes on
    Failed { reason: String },
    /// Nothing was applied: a send was already outstanding, or the session
    /// was paid, closed or replaced before the wallet answered
    Ignored,
}

// ============================================================================
// Open options
// ============================================================================

/// Options for [`PaymentController::open`].
pub struct OpenOptions {
    address: String,
    amount_kas: f64,
    item: Option<String>,
    theme: Theme,
    on_success: Option<SuccessCallback>,
}

impl OpenOptions {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            amount_kas: 0.0,
            item: None,
            theme: Theme::default(),
            on_success: None,
        }
    }

    /// Amount as given by the merchant; non-numeric input reads as 0
    pub fn amount(mut self, raw: &str) -> Self {
        self.amount_kas = parse_amount(Some(raw));
        self
    }

    /// Amount in KAS; negative and non-finite values read as 0
    pub fn amount_kas(mut self, amount: f64) -> Self {
        self.amount_kas = if amount.is_finite() && amount > 0.0 { amount } else { 0.0 };
        self
    }

    pub fn item(mut self, item: impl Into<String>) -> Self {
        self.item = Some(item.into());
        self
    }

    pub fn theme(mut self, theme: Theme) -> Self {
        self.theme = theme;
        self
    }

    /// Called once, outside any controller lock, when the session is paid
    pub fn on_success<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(PaymentSuccess) + Send + 'static,
    {
        self.on_success = Some(Box::new(callback));
        self
    }
}

impl std::fmt::Debug for OpenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenOptions")
            .field("address", &self.address)
            .field("amount_kas", &self.amount_kas)
            .field("item", &self.item)
            .field("theme", &self.theme)
            .field("on_success", &self.on_success.is_some())
            .finish()
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Render model of the current session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub view: SessionView,
    pub address: String,
    pub amount_kas: f64,
    pub amount_sompi: u64,
    /// Amount as shown in the modal ("1,234.5")
    pub amount_label: String,
    pub item: String,
    pub theme: Theme,
    pub payment_uri: String,
    pub qr_image_url: String,
    pub wallet_send_in_flight: bool,
    pub active_wallet: Option<WalletKind>,
    pub success_txid: Option<String>,
    pub explorer_url: Option<String>,
    /// Whether the reconciler is still watching the address
    pub polling_active: bool,
    pub opened_at: DateTime<Utc>,
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Default)]
struct ControllerState {
    session: Option<Session>,
    polling: Option<PollingContext>,
    on_success: Option<SuccessCallback>,
}

impl ControllerState {
    fn live_session_id(&self) -> Option<SessionId> {
        self.session
            .as_ref()
            .filter(|s| !s.is_terminal())
            .map(Session::id)
    }

    fn owns_poll(&self, session_id: SessionId, context_id: u64) -> bool {
        self.session.as_ref().map(Session::id) == Some(session_id)
            && self.polling.as_ref().map(PollingContext::id) == Some(context_id)
    }
}

struct WalletSend {
    kind: WalletKind,
    address: String,
    amount_sompi: u64,
}

/// Work left over from a transition that must run after the lock is released.
#[derive(Default)]
struct Deferred {
    wallet_send: Option<WalletSend>,
    paid_txid: Option<String>,
    error: Option<String>,
    success: Option<(SuccessCallback, PaymentSuccess)>,
}

impl Deferred {
    fn fire_success(&mut self) {
        if let Some((callback, paid)) = self.success.take() {
            callback(paid);
        }
    }
}

struct Inner {
    config: EngineConfig,
    reconciler: Reconciler,
    wallets: WalletRegistry,
    state: Mutex<ControllerState>,
    events: broadcast::Sender<SessionEvent>,
    next_session_id: AtomicU64,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    /// Feed `input` to the current session and carry out its effects.
    fn apply(&self, state: &mut ControllerState, input: SessionInput) -> Deferred {
        let mut deferred = Deferred::default();
        let Some(session) = state.session.as_mut() else {
            return deferred;
        };
        let session_id = session.id();

        for effect in session.apply(input) {
            match effect {
                SessionEffect::InvokeWallet {
                    kind,
                    address,
                    amount_sompi,
                } => {
                    self.emit(SessionEvent::WalletSendStarted {
                        session_id,
                        wallet: kind,
                    });
                    deferred.wallet_send = Some(WalletSend {
                        kind,
                        address,
                        amount_sompi,
                    });
                }
                SessionEffect::StopPolling => {
                    if let Some(context) = state.polling.take() {
                        context.stop();
                    }
                }
                SessionEffect::NotifySuccess { txid, source } => {
                    tracing::info!(
                        session_id = %session_id,
                        txid = %txid,
                        source = ?source,
                        "Payment confirmed"
                    );
                    self.emit(SessionEvent::Paid {
                        session_id,
                        txid: txid.clone(),
                        source,
                    });
                    deferred.paid_txid = Some(txid.clone());
                    if let Some(callback) = state.on_success.take() {
                        deferred.success = Some((
                            callback,
                            PaymentSuccess {
                                session_id,
                                txid,
                                source,
                            },
                        ));
                    }
                }
                SessionEffect::ShowError { reason } => deferred.error = Some(reason),
            }
        }
        deferred
    }

    /// Close the current session, if it is not closed already.
    fn close_current(&self, state: &mut ControllerState) {
        let Some(session_id) = state
            .session
            .as_ref()
            .filter(|s| s.view() != SessionView::Closed)
            .map(Session::id)
        else {
            return;
        };
        self.apply(state, SessionInput::Close);
        state.on_success = None;
        tracing::info!(session_id = %session_id, "Payment session closed");
        self.emit(SessionEvent::Closed { session_id });
    }
}

/// Drives payment sessions. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct PaymentController {
    inner: Arc<Inner>,
}

impl PaymentController {
    /// Create a controller reading the ledger through `ledger` and sending
    /// through the wallets in `wallets`.
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn LedgerApi>,
        wallets: WalletRegistry,
    ) -> KaspaPayResult<Self> {
        config.validate()?;
        let reconciler = Reconciler::new(config.reconciler.clone(), ledger)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                reconciler,
                wallets,
                state: Mutex::new(ControllerState::default()),
                events,
                next_session_id: AtomicU64::new(1),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn wallets(&self) -> &WalletRegistry {
        &self.inner.wallets
    }

    /// Follow session events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Start a new payment session, replacing any current one.
    ///
    /// The address is validated first; an invalid address fails without
    /// touching the current session or the network. Otherwise the current
    /// session is closed and its polling stopped before the new session's
    /// polling starts.
    pub async fn open(&self, options: OpenOptions) -> KaspaPayResult<SessionId> {
        let address = KaspaAddress::parse(&options.address, self.inner.config.network)?;
        let request = PaymentRequest {
            address,
            amount_kas: options.amount_kas,
            item: options
                .item
                .filter(|item| !item.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ITEM_LABEL.to_string()),
            theme: options.theme,
        };
        if request.amount_sompi() == 0 {
            tracing::warn!(address = %request.address, "Opening payment session with a zero amount");
        }

        let mut state = self.inner.state.lock().await;
        self.inner.close_current(&mut state);

        let session_id = SessionId(self.inner.next_session_id.fetch_add(1, Ordering::Relaxed));
        let (context, outcome) = self
            .inner
            .reconciler
            .start(&request.address, request.amount_kas);
        let context_id = context.id();

        tracing::info!(
            session_id = %session_id,
            address = %request.address,
            amount = %format_kas(request.amount_kas),
            item = %request.item,
            "Payment session opened"
        );
        self.inner.emit(SessionEvent::Opened {
            session_id,
            address: request.address.to_string(),
            amount_sompi: request.amount_sompi(),
        });

        state.session = Some(Session::new(session_id, request));
        state.polling = Some(context);
        state.on_success = options.on_success;
        drop(state);

        tokio::spawn(watch_outcome(
            Arc::downgrade(&self.inner),
            session_id,
            context_id,
            outcome,
        ));
        Ok(session_id)
    }

    /// Pay through the `kind` wallet.
    ///
    /// At most one send per session is outstanding; further selections while
    /// it runs are [`WalletOutcome::Ignored`]. Fails with
    /// [`KaspaPayError::SessionNotActive`] when no session awaits payment.
    ///
    /// The send runs on a controller-owned task, so dropping the returned
    /// future does not strand the session in `Processing`: the wallet's answer
    /// is still applied when it arrives.
    pub async fn select_wallet(&self, kind: WalletKind) -> KaspaPayResult<WalletOutcome> {
        let (session_id, send) = {
            let mut state = self.inner.state.lock().await;
            let session_id = state.live_session_id().ok_or(KaspaPayError::SessionNotActive)?;
            let deferred = self.inner.apply(&mut state, SessionInput::WalletSelected { kind });
            match deferred.wallet_send {
                Some(send) => (session_id, send),
                None => return Ok(WalletOutcome::Ignored),
            }
        };

        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::spawn(run_wallet_send(self.inner.clone(), session_id, send, outcome_tx));
        Ok(outcome_rx.await.unwrap_or(WalletOutcome::Ignored))
    }

    /// Close the current session. Idempotent; never fires the success callback.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        self.inner.close_current(&mut state);
    }

    /// Render model of the current (possibly terminal) session
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let state = self.inner.state.lock().await;
        let session = state.session.as_ref()?;
        let request = session.request();
        let uri = payment_uri(&request.address, request.amount_kas);

        Some(SessionSnapshot {
            id: session.id(),
            view: session.view(),
            address: request.address.to_string(),
            amount_kas: request.amount_kas,
            amount_sompi: request.amount_sompi(),
            amount_label: format_kas(request.amount_kas),
            item: request.item.clone(),
            theme: request.theme,
            qr_image_url: qr_image_url(&self.inner.config.qr, &uri),
            payment_uri: uri,
            wallet_send_in_flight: session.wallet_send_in_flight(),
            active_wallet: session.active_wallet(),
            success_txid: session.success_txid().map(str::to_string),
            explorer_url: session.success_txid().map(explorer_tx_url),
            polling_active: state.polling.as_ref().is_some_and(PollingContext::is_active),
            opened_at: session.opened_at(),
        })
    }

    /// Wallet picker entries for the current session
    pub async fn picker_options(&self, platform: Platform) -> KaspaPayResult<Vec<PickerOption>> {
        let state = self.inner.state.lock().await;
        let session = state
            .session
            .as_ref()
            .filter(|s| !s.is_terminal())
            .ok_or(KaspaPayError::SessionNotActive)?;
        let request = session.request();
        let uri = payment_uri(&request.address, request.amount_kas);
        Ok(self.inner.wallets.picker_options(platform, &uri))
    }
}

impl std::fmt::Debug for PaymentController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentController")
            .field("network", &self.inner.config.network)
            .field("wallets", &self.inner.wallets)
            .finish()
    }
}

/// Carry out one wallet send and apply its result, unless the session has
/// moved on. The outcome goes to `reply` if anyone still waits for it.
async fn run_wallet_send(
    inner: Arc<Inner>,
    session_id: SessionId,
    send: WalletSend,
    reply: oneshot::Sender<WalletOutcome>,
) {
    tracing::info!(
        session_id = %session_id,
        wallet = %send.kind,
        amount_sompi = send.amount_sompi,
        "Requesting wallet send"
    );
    let result = inner
        .wallets
        .send(send.kind, &send.address, send.amount_sompi)
        .await;

    let mut state = inner.state.lock().await;
    if state.session.as_ref().map(Session::id) != Some(session_id) {
        tracing::debug!(session_id = %session_id, "Discarding wallet result for a replaced session");
        let _ = reply.send(WalletOutcome::Ignored);
        return;
    }

    let outcome = match result {
        Ok(txid) => {
            let mut deferred = inner.apply(&mut state, SessionInput::WalletResolved { txid });
            drop(state);
            deferred.fire_success();
            match deferred.paid_txid {
                Some(txid) => WalletOutcome::Paid { txid },
                None => WalletOutcome::Ignored,
            }
        }
        Err(e) => {
            let deferred = inner.apply(
                &mut state,
                SessionInput::WalletRejected {
                    reason: e.message.clone(),
                },
            );
            match deferred.error {
                Some(reason) => {
                    tracing::warn!(
                        session_id = %session_id,
                        wallet = %send.kind,
                        reason = %reason,
                        "Wallet send failed, back to wallet picker"
                    );
                    inner.emit(SessionEvent::WalletSendFailed {
                        session_id,
                        wallet: send.kind,
                        reason: reason.clone(),
                    });
                    WalletOutcome::Failed { reason }
                }
                None => WalletOutcome::Ignored,
            }
        }
    };
    let _ = reply.send(outcome);
}

/// Apply the single outcome of one polling context, unless its session has
/// moved on.
async fn watch_outcome(
    inner: Weak<Inner>,
    session_id: SessionId,
    context_id: u64,
    outcome: oneshot::Receiver<PollOutcome>,
) {
    // stopped contexts report nothing
    let Ok(outcome) = outcome.await else {
        return;
    };
    let Some(inner) = inner.upgrade() else {
        return;
    };

    let mut state = inner.state.lock().await;
    if !state.owns_poll(session_id, context_id) {
        tracing::debug!(session_id = %session_id, context_id, "Discarding stale poll outcome");
        return;
    }

    match outcome {
        PollOutcome::Matched(payment) => {
            let mut deferred = inner.apply(
                &mut state,
                SessionInput::PaymentObserved {
                    txid: payment.transaction_id,
                },
            );
            drop(state);
            deferred.fire_success();
        }
        PollOutcome::Expired { .. } => {
            state.polling = None;
            inner.emit(SessionEvent::PollingExpired { session_id });
        }
    }
}
