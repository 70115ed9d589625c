//! Confirmation reconciler: watches an address for the expected payment.
//!
//! [`Reconciler::start`] spawns one polling task per [`PollingContext`]. Every
//! `poll_interval` the task fetches the address UTXO set and scans it, in the
//! order the API returns it, for the first output within `tolerance_sompi` of
//! the expected amount. The expected amount is converted to sompi once, when
//! polling starts.
//!
//! The task reports at most one [`PollOutcome`] and then stops itself:
//!
//! - `Matched` when an output matches,
//! - `Expired` when `timeout` passes without a match.
//!
//! A stopped context reports nothing. Failed fetches are logged and retried on
//! the next tick; they never end the wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, OnceCell};
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::amount::within_tolerance;
use crate::ledger::{LedgerApi, UtxoRecord};
use crate::{kas_to_sompi, KaspaAddress, KaspaPayError, KaspaPayResult, DEFAULT_TOLERANCE_SOMPI};

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Polling parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Seconds between UTXO checks.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Largest accepted difference between an output and the expected
    /// amount, in sompi.
    #[serde(default = "default_tolerance_sompi")]
    pub tolerance_sompi: u64,

    /// Seconds after which an unmatched context gives up.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    5
}
fn default_tolerance_sompi() -> u64 {
    DEFAULT_TOLERANCE_SOMPI
}
fn default_timeout_secs() -> u64 {
    30 * 60
}

fn whole_secs_rounded_up(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            tolerance_sompi: default_tolerance_sompi(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl ReconcilerConfig {
    /// Whole seconds; a partial second rounds up.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_secs = whole_secs_rounded_up(interval);
        self
    }

    pub fn with_tolerance_sompi(mut self, tolerance: u64) -> Self {
        self.tolerance_sompi = tolerance;
        self
    }

    /// Whole seconds; a partial second rounds up.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = whole_secs_rounded_up(timeout);
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> KaspaPayResult<()> {
        if self.poll_interval_secs == 0 {
            return Err(KaspaPayError::Config("poll interval must be at least 1 second".into()));
        }
        if self.timeout_secs < self.poll_interval_secs {
            return Err(KaspaPayError::Config(format!(
                "timeout ({}s) is shorter than the poll interval ({}s)",
                self.timeout_secs, self.poll_interval_secs
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════════

/// A UTXO accepted as the payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedPayment {
    /// Context that found it
    pub context_id: u64,
    pub transaction_id: String,
    pub amount_sompi: u64,
}

/// The single report of a polling context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Matched(MatchedPayment),
    Expired { context_id: u64 },
}

/// First output in `utxos` within `tolerance` of `expected_sompi`.
pub fn find_match(utxos: &[UtxoRecord], expected_sompi: u64, tolerance: u64) -> Option<&UtxoRecord> {
    utxos
        .iter()
        .find(|utxo| within_tolerance(utxo.amount_sompi, expected_sompi, tolerance))
}

// ═══════════════════════════════════════════════════════════════════════════════
// POLLING CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Handle to one running poll. Dropping it stops the poll.
#[derive(Debug)]
pub struct PollingContext {
    id: u64,
    target_address: KaspaAddress,
    expected_amount_sompi: u64,
    started_at: Instant,
    cancel: CancellationToken,
    baseline_balance: Arc<OnceCell<u64>>,
}

impl PollingContext {
    /// Identity checked before any report of this context is applied
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target_address(&self) -> &KaspaAddress {
        &self.target_address
    }

    pub fn expected_amount_sompi(&self) -> u64 {
        self.expected_amount_sompi
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Address balance seen when polling started, once fetched.
    ///
    /// Diagnostic only; a failed fetch reads as 0.
    pub fn baseline_balance(&self) -> Option<u64> {
        self.baseline_balance.get().copied()
    }

    /// Stop polling. Idempotent.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(context_id = self.id, "Stopping payment polling");
            self.cancel.cancel();
        }
    }

    /// False once stopped, matched or expired
    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for PollingContext {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RECONCILER
// ═══════════════════════════════════════════════════════════════════════════════

/// Starts polling contexts against one ledger API.
pub struct Reconciler {
    config: ReconcilerConfig,
    ledger: Arc<dyn LedgerApi>,
    next_context_id: AtomicU64,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig, ledger: Arc<dyn LedgerApi>) -> KaspaPayResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ledger,
            next_context_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Begin watching `address` for `expected_amount_kas`.
    ///
    /// Must be called from within a Tokio runtime. The receiver yields the
    /// context's single outcome, or an error if the context was stopped first.
    pub fn start(
        &self,
        address: &KaspaAddress,
        expected_amount_kas: f64,
    ) -> (PollingContext, oneshot::Receiver<PollOutcome>) {
        let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
        let expected_amount_sompi = kas_to_sompi(expected_amount_kas);
        let cancel = CancellationToken::new();
        let baseline_balance = Arc::new(OnceCell::new());
        let started_at = Instant::now();
        let (outcome_tx, outcome_rx) = oneshot::channel();

        tracing::info!(
            context_id = id,
            address = %address,
            expected_sompi = expected_amount_sompi,
            poll_interval_secs = self.config.poll_interval_secs,
            "Payment polling started"
        );

        tokio::spawn(fetch_baseline(
            self.ledger.clone(),
            address.to_string(),
            cancel.clone(),
            baseline_balance.clone(),
        ));

        let poll = PollTask {
            context_id: id,
            ledger: self.ledger.clone(),
            address: address.to_string(),
            expected_amount_sompi,
            config: self.config.clone(),
            started_at,
            cancel: cancel.clone(),
        };
        tokio::spawn(poll.run(outcome_tx));

        let context = PollingContext {
            id,
            target_address: address.clone(),
            expected_amount_sompi,
            started_at,
            cancel,
            baseline_balance,
        };
        (context, outcome_rx)
    }

    /// Stop `context`. Same as [`PollingContext::stop`].
    pub fn stop(&self, context: &PollingContext) {
        context.stop();
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish()
    }
}

/// Baseline balance fetch, run beside the poll loop so it never delays the
/// first check.
async fn fetch_baseline(
    ledger: Arc<dyn LedgerApi>,
    address: String,
    cancel: CancellationToken,
    baseline: Arc<OnceCell<u64>>,
) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = ledger.balance(&address) => {
            let balance = result.unwrap_or_else(|e| {
                tracing::debug!(error = %e, "Baseline balance unavailable, using 0");
                0
            });
            tracing::debug!(address = %address, balance_sompi = balance, "Baseline balance");
            let _ = baseline.set(balance);
        }
    }
}

struct PollTask {
    context_id: u64,
    ledger: Arc<dyn LedgerApi>,
    address: String,
    expected_amount_sompi: u64,
    config: ReconcilerConfig,
    started_at: Instant,
    cancel: CancellationToken,
}

impl PollTask {
    fn expired(&self) -> PollOutcome {
        tracing::info!(
            context_id = self.context_id,
            timeout_secs = self.config.timeout_secs,
            "No matching payment before timeout, polling stopped"
        );
        PollOutcome::Expired {
            context_id: self.context_id,
        }
    }

    async fn run(self, outcome_tx: oneshot::Sender<PollOutcome>) {
        let period = self.config.poll_interval();
        let deadline = self.started_at + self.config.timeout();
        let mut ticker = interval_at(self.started_at + period, period);
        // a slow fetch swallows the ticks it overlaps
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!(context_id = self.context_id, "Payment polling cancelled");
                    return;
                }
                _ = sleep_until(deadline) => break self.expired(),
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::debug!(context_id = self.context_id, "Discarding in-flight UTXO fetch");
                    return;
                }
                // a response landing after the deadline is never applied
                _ = sleep_until(deadline) => break self.expired(),
                result = self.ledger.utxos(&self.address) => result,
            };

            match fetched {
                Ok(utxos) => {
                    tracing::debug!(
                        context_id = self.context_id,
                        utxo_count = utxos.len(),
                        "Checked address UTXOs"
                    );
                    if let Some(utxo) =
                        find_match(&utxos, self.expected_amount_sompi, self.config.tolerance_sompi)
                    {
                        tracing::info!(
                            context_id = self.context_id,
                            txid = %utxo.transaction_id,
                            amount_sompi = utxo.amount_sompi,
                            "Matching payment found"
                        );
                        break PollOutcome::Matched(MatchedPayment {
                            context_id: self.context_id,
                            transaction_id: utxo.transaction_id.clone(),
                            amount_sompi: utxo.amount_sompi,
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        context_id = self.context_id,
                        error = %e,
                        "UTXO poll failed, retrying on next tick"
                    );
                }
            }
        };

        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        let _ = outcome_tx.send(outcome);
    }
}
