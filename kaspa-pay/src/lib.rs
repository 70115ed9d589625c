//! # kaspa-pay: payment confirmation engine for Kaspa
//!
//! This crate decides, exactly once, that a fixed-amount Kaspa payment request
//! has been paid. It needs no merchant backend: evidence comes either from a
//! browser wallet that returns a transaction id, or from polling a public
//! ledger read API for a UTXO that matches the requested amount.
//!
//! ## Components
//!
//! - **Session state machine** ([`session`]): `Picking → Processing → Success`,
//!   with `Closed` reachable from anywhere. Pure, no I/O.
//! - **Confirmation reconciler** ([`reconciler`]): background UTXO polling with a
//!   fixed tolerance, interval and timeout.
//! - **Wallet adapter** ([`wallet`]): the injected `sendTransfer` capabilities.
//! - **Controller** ([`controller`]): owns one live session and its polling
//!   context, runs wallet sends and applies reconciler matches.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kaspa_pay::{EngineConfig, OpenOptions, PaymentController, RestLedgerApi, WalletRegistry};
//!
//! let config = EngineConfig::default();
//! let ledger = Arc::new(RestLedgerApi::new(config.ledger.clone())?);
//! let controller = PaymentController::new(config, ledger, WalletRegistry::new())?;
//!
//! controller
//!     .open(
//!         OpenOptions::new("kaspa:qr...")
//!             .amount("10")
//!             .item("Coffee")
//!             .on_success(|paid| println!("paid in {}", paid.txid)),
//!     )
//!     .await?;
//! ```
//!
//! ## Amounts
//!
//! Display amounts are KAS; every comparison happens in sompi, the integer
//! smallest unit (1 KAS = 100,000,000 sompi). The expected amount is converted
//! once when polling starts.

pub mod address;
pub mod amount;
pub mod config;
pub mod controller;
pub mod error;
pub mod ledger;
pub mod reconciler;
pub mod session;
pub mod uri;
pub mod wallet;

pub use address::{KaspaAddress, Network};
pub use amount::{format_kas, parse_amount, within_tolerance};
pub use config::EngineConfig;
pub use controller::{OpenOptions, PaymentController, PaymentSuccess, SessionSnapshot, WalletOutcome};
pub use error::{KaspaPayError, KaspaPayResult};
pub use ledger::{LedgerApi, LedgerApiConfig, RestLedgerApi, UtxoRecord};
pub use reconciler::{find_match, MatchedPayment, PollOutcome, PollingContext, Reconciler, ReconcilerConfig};
pub use session::{
    PaymentRequest, PaymentSource, Session, SessionEffect, SessionEvent, SessionId, SessionInput,
    SessionView, Theme,
};
pub use uri::{explorer_tx_url, pay_button_label, payment_uri, qr_image_url, QrConfig};
pub use wallet::{PickerOption, Platform, WalletCapability, WalletError, WalletKind, WalletRegistry};

/// One KAS in sompi
pub const SOMPI_PER_KAS: u64 = 100_000_000;

/// Default absolute matching tolerance in sompi (0.0001 KAS)
pub const DEFAULT_TOLERANCE_SOMPI: u64 = 10_000;

/// Item label used when the merchant does not provide one
pub const DEFAULT_ITEM_LABEL: &str = "Payment";

/// Convert KAS to sompi, rounding to the nearest unit.
///
/// Negative and non-finite inputs convert to 0.
#[inline]
pub fn kas_to_sompi(kas: f64) -> u64 {
    if !kas.is_finite() || kas <= 0.0 {
        return 0;
    }
    (kas * SOMPI_PER_KAS as f64).round() as u64
}

/// Convert sompi to KAS
#[inline]
pub fn sompi_to_kas(sompi: u64) -> f64 {
    sompi as f64 / SOMPI_PER_KAS as f64
}
