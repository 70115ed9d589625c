//! Payment session state machine
//!
//! One [`Session`] per payment attempt. The machine is pure: [`Session::apply`]
//! takes a [`SessionInput`] and returns the [`SessionEffect`]s the controller
//! must carry out (invoke a wallet, stop polling, notify success). Inputs that
//! are not legal in the current view are no-ops and return no effects.
//!
//! ```text
//!   Picking ──wallet selected──▶ Processing ──wallet txid──▶ Success
//!      ▲                            │
//!      └────── wallet rejected ─────┘
//!   Picking | Processing ──payment observed──▶ Success
//!   any ──close──▶ Closed
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::wallet::WalletKind;
use crate::{kas_to_sompi, KaspaAddress};

// ============================================================================
// Core Types
// ============================================================================

/// Identifier of a payment session, unique per controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Presentation variant. No effect on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }

    /// Unknown names fall back to the default theme
    pub fn parse_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "light" => Theme::Light,
            _ => Theme::Dark,
        }
    }
}

/// Which view of the modal is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionView {
    /// Wallet picker with QR code; polling is live
    Picking,
    /// A direct wallet send is outstanding
    Processing,
    /// Terminal: payment confirmed
    Success,
    /// Terminal: closed by the user or superseded
    Closed,
}

impl SessionView {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionView::Success | SessionView::Closed)
    }

    /// Views during which a polling context must exist
    pub fn is_awaiting_payment(&self) -> bool {
        matches!(self, SessionView::Picking | SessionView::Processing)
    }
}

impl std::fmt::Display for SessionView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionView::Picking => write!(f, "picking"),
            SessionView::Processing => write!(f, "processing"),
            SessionView::Success => write!(f, "success"),
            SessionView::Closed => write!(f, "closed"),
        }
    }
}

/// Where the evidence of payment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSource {
    /// A wallet send resolved with a transaction id
    Wallet(WalletKind),
    /// The reconciler found a matching UTXO
    Ledger,
}

/// The validated request a session was opened with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequest {
    pub address: KaspaAddress,
    /// Expected amount in KAS
    pub amount_kas: f64,
    pub item: String,
    pub theme: Theme,
}

impl PaymentRequest {
    /// Expected amount in sompi
    pub fn amount_sompi(&self) -> u64 {
        kas_to_sompi(self.amount_kas)
    }
}

// ============================================================================
// Inputs and Effects
// ============================================================================

/// Everything that can move a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// The payer picked a wallet in the picker
    WalletSelected { kind: WalletKind },
    /// The wallet send resolved
    WalletResolved { txid: String },
    /// The wallet send was rejected or failed
    WalletRejected { reason: String },
    /// The reconciler found a matching UTXO
    PaymentObserved { txid: String },
    /// The payer closed the modal, or a new session supersedes this one
    Close,
}

/// Work the controller must do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    /// Start the (single) wallet send
    InvokeWallet {
        kind: WalletKind,
        address: String,
        amount_sompi: u64,
    },
    /// Tear down the polling context
    StopPolling,
    /// Fire the success callback; emitted at most once per session
    NotifySuccess { txid: String, source: PaymentSource },
    /// Show a recoverable failure to the payer
    ShowError { reason: String },
}

/// Events broadcast to observers (renderers, the watcher binary).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Opened {
        session_id: SessionId,
        address: String,
        amount_sompi: u64,
    },
    WalletSendStarted {
        session_id: SessionId,
        wallet: WalletKind,
    },
    WalletSendFailed {
        session_id: SessionId,
        wallet: WalletKind,
        reason: String,
    },
    Paid {
        session_id: SessionId,
        txid: String,
        source: PaymentSource,
    },
    /// Polling hit its timeout; the manual path is no longer watched
    PollingExpired { session_id: SessionId },
    Closed { session_id: SessionId },
}

// ============================================================================
// Session
// ============================================================================

/// One payment attempt.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    request: PaymentRequest,
    view: SessionView,
    wallet_send_in_flight: bool,
    active_wallet: Option<WalletKind>,
    success_txid: Option<String>,
    opened_at: DateTime<Utc>,
}

impl Session {
    /// Creates a session in the Picking view.
    pub fn new(id: SessionId, request: PaymentRequest) -> Self {
        Self {
            id,
            request,
            view: SessionView::Picking,
            wallet_send_in_flight: false,
            active_wallet: None,
            success_txid: None,
            opened_at: Utc::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn request(&self) -> &PaymentRequest {
        &self.request
    }

    pub fn view(&self) -> SessionView {
        self.view
    }

    pub fn wallet_send_in_flight(&self) -> bool {
        self.wallet_send_in_flight
    }

    /// Wallet of the outstanding send, if any
    pub fn active_wallet(&self) -> Option<WalletKind> {
        self.active_wallet
    }

    pub fn success_txid(&self) -> Option<&str> {
        self.success_txid.as_deref()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn is_terminal(&self) -> bool {
        self.view.is_terminal()
    }

    /// Apply an input and return the effects to carry out.
    pub fn apply(&mut self, input: SessionInput) -> Vec<SessionEffect> {
        match input {
            SessionInput::WalletSelected { kind } => {
                if self.view != SessionView::Picking || self.wallet_send_in_flight {
                    return vec![];
                }
                self.view = SessionView::Processing;
                self.wallet_send_in_flight = true;
                self.active_wallet = Some(kind);
                vec![SessionEffect::InvokeWallet {
                    kind,
                    address: self.request.address.to_string(),
                    amount_sompi: self.request.amount_sompi(),
                }]
            }
            SessionInput::WalletResolved { txid } => {
                let Some(kind) = self.outstanding_send() else {
                    return vec![];
                };
                self.claim_success(txid, PaymentSource::Wallet(kind))
            }
            SessionInput::WalletRejected { reason } => {
                if self.outstanding_send().is_none() {
                    return vec![];
                }
                // polling keeps running: the payer may still pay by QR
                self.view = SessionView::Picking;
                self.wallet_send_in_flight = false;
                self.active_wallet = None;
                vec![SessionEffect::ShowError { reason }]
            }
            SessionInput::PaymentObserved { txid } => {
                self.claim_success(txid, PaymentSource::Ledger)
            }
            SessionInput::Close => {
                if self.view == SessionView::Closed {
                    return vec![];
                }
                self.view = SessionView::Closed;
                self.wallet_send_in_flight = false;
                self.active_wallet = None;
                vec![SessionEffect::StopPolling]
            }
        }
    }

    fn outstanding_send(&self) -> Option<WalletKind> {
        if self.view == SessionView::Processing && self.wallet_send_in_flight {
            self.active_wallet
        } else {
            None
        }
    }

    /// The one place a session enters Success. Whichever evidence source
    /// arrives first wins; later claims find a terminal view and do nothing.
    fn claim_success(&mut self, txid: String, source: PaymentSource) -> Vec<SessionEffect> {
        if !self.view.is_awaiting_payment() {
            return vec![];
        }
        self.view = SessionView::Success;
        self.wallet_send_in_flight = false;
        self.active_wallet = None;
        self.success_txid = Some(txid.clone());
        vec![
            SessionEffect::StopPolling,
            SessionEffect::NotifySuccess { txid, source },
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Network;

    fn test_session() -> Session {
        let request = PaymentRequest {
            address: KaspaAddress::parse("kaspa:qqsessiontest", Network::Mainnet).unwrap(),
            amount_kas: 5.0,
            item: "Coffee".into(),
            theme: Theme::Dark,
        };
        Session::new(SessionId(1), request)
    }

    fn notify_count(effects: &[SessionEffect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, SessionEffect::NotifySuccess { .. }))
            .count()
    }

    #[test]
    fn test_session_starts_in_picking() {
        let session = test_session();
        assert_eq!(session.view(), SessionView::Picking);
        assert!(!session.wallet_send_in_flight());
        assert!(session.success_txid().is_none());
        assert!(!session.is_terminal());
    }

    #[test]
    fn test_wallet_selection_invokes_wallet_once() {
        let mut session = test_session();

        let effects = session.apply(SessionInput::WalletSelected { kind: WalletKind::Kasware });
        assert_eq!(
            effects,
            vec![SessionEffect::InvokeWallet {
                kind: WalletKind::Kasware,
                address: "kaspa:qqsessiontest".into(),
                amount_sompi: 500_000_000,
            }]
        );
        assert_eq!(session.view(), SessionView::Processing);
        assert!(session.wallet_send_in_flight());

        // double click while the send is outstanding
        assert!(session.apply(SessionInput::WalletSelected { kind: WalletKind::Kastle }).is_empty());
        assert_eq!(session.active_wallet(), Some(WalletKind::Kasware));
    }

    #[test]
    fn test_wallet_success() {
        let mut session = test_session();
        session.apply(SessionInput::WalletSelected { kind: WalletKind::Kastle });

        let effects = session.apply(SessionInput::WalletResolved { txid: "tx1".into() });
        assert_eq!(
            effects,
            vec![
                SessionEffect::StopPolling,
                SessionEffect::NotifySuccess {
                    txid: "tx1".into(),
                    source: PaymentSource::Wallet(WalletKind::Kastle),
                },
            ]
        );
        assert_eq!(session.view(), SessionView::Success);
        assert_eq!(session.success_txid(), Some("tx1"));
        assert!(!session.wallet_send_in_flight());
    }

    #[test]
    fn test_wallet_rejection_returns_to_picker_without_stopping_polling() {
        let mut session = test_session();
        session.apply(SessionInput::WalletSelected { kind: WalletKind::Kasware });

        let effects = session.apply(SessionInput::WalletRejected { reason: "User rejected".into() });
        assert_eq!(effects, vec![SessionEffect::ShowError { reason: "User rejected".into() }]);
        assert_eq!(session.view(), SessionView::Picking);
        assert!(!session.wallet_send_in_flight());

        // the picker is usable again
        assert_eq!(
            session.apply(SessionInput::WalletSelected { kind: WalletKind::Kasware }).len(),
            1
        );
    }

    #[test]
    fn test_ledger_match_from_picking() {
        let mut session = test_session();
        let effects = session.apply(SessionInput::PaymentObserved { txid: "txL".into() });
        assert_eq!(notify_count(&effects), 1);
        assert_eq!(session.view(), SessionView::Success);
    }

    #[test]
    fn test_success_claimed_once_when_sources_race() {
        let mut session = test_session();
        session.apply(SessionInput::WalletSelected { kind: WalletKind::Kasware });

        let first = session.apply(SessionInput::PaymentObserved { txid: "tx1".into() });
        let second = session.apply(SessionInput::WalletResolved { txid: "tx1".into() });
        let third = session.apply(SessionInput::PaymentObserved { txid: "tx2".into() });

        assert_eq!(notify_count(&first), 1);
        assert!(second.is_empty());
        assert!(third.is_empty());
        assert_eq!(session.success_txid(), Some("tx1"));
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let mut session = test_session();
        session.apply(SessionInput::WalletSelected { kind: WalletKind::Kasware });

        assert_eq!(session.apply(SessionInput::Close), vec![SessionEffect::StopPolling]);
        assert_eq!(session.view(), SessionView::Closed);
        assert!(!session.wallet_send_in_flight());
        assert!(session.apply(SessionInput::Close).is_empty());

        // late results never revive a closed session
        assert!(session.apply(SessionInput::WalletResolved { txid: "late".into() }).is_empty());
        assert!(session.apply(SessionInput::PaymentObserved { txid: "late".into() }).is_empty());
        assert!(session.success_txid().is_none());
    }

    #[test]
    fn test_rejection_without_send_is_ignored() {
        let mut session = test_session();
        assert!(session.apply(SessionInput::WalletRejected { reason: "x".into() }).is_empty());
        assert!(session.apply(SessionInput::WalletResolved { txid: "x".into() }).is_empty());
        assert_eq!(session.view(), SessionView::Picking);
    }

    #[test]
    fn test_view_display() {
        assert_eq!(SessionView::Processing.to_string(), "processing");
        assert_eq!(SessionId(7).to_string(), "session:7");
        assert_eq!(Theme::parse_or_default("LIGHT"), Theme::Light);
        assert_eq!(Theme::parse_or_default("neon"), Theme::Dark);
    }
}
