//! kaspa-pay-watcher
//!
//! Opens one payment session for an address and amount, prints what a payer
//! needs (payment URI, QR image URL, amount), then waits until the ledger shows
//! the payment.
//!
//! Exit status:
//! - 0 when the payment is confirmed, or on Ctrl-C
//! - non-zero when polling times out or the request is invalid

mod config;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use kaspa_pay::{
    explorer_tx_url, pay_button_label, OpenOptions, PaymentController, RestLedgerApi, SessionEvent,
    SessionId, WalletRegistry,
};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::WatcherConfig;

#[derive(Parser, Debug)]
#[command(
    name = "kaspa-pay-watcher",
    about = "Wait for a Kaspa payment to an address to confirm"
)]
pub struct Cli {
    /// Address to watch (overrides KASPA_PAY_ADDRESS).
    #[arg(long)]
    pub address: Option<String>,
    /// Amount in KAS (overrides KASPA_PAY_AMOUNT).
    #[arg(long)]
    pub amount: Option<String>,
    /// Item label shown with the request.
    #[arg(long)]
    pub item: Option<String>,
    /// Network whose address prefix is enforced.
    #[arg(long, value_enum)]
    pub network: Option<NetworkArg>,
    /// Ledger read API root.
    #[arg(long)]
    pub api_url: Option<String>,
    /// Seconds between UTXO checks.
    #[arg(long)]
    pub poll_interval: Option<u64>,
    /// Seconds to wait before giving up.
    #[arg(long)]
    pub timeout: Option<u64>,
    /// Print session events as JSON lines.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetworkArg {
    Mainnet,
    Testnet,
}

impl From<NetworkArg> for kaspa_pay::Network {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Mainnet => kaspa_pay::Network::Mainnet,
            NetworkArg::Testnet => kaspa_pay::Network::Testnet,
        }
    }
}

/// How the watch ended.
#[derive(Debug, PartialEq, Eq)]
enum WatchEnd {
    Paid { txid: String },
    Expired,
    Closed,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kaspa_pay=info,kaspa_pay_watcher=info".into()),
        )
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = WatcherConfig::from_env()?.with_cli(&cli);

    let address = config
        .address
        .clone()
        .context("no address to watch: pass --address or set KASPA_PAY_ADDRESS")?;
    let amount = config.amount.clone().unwrap_or_default();
    let engine = config.engine_config();

    info!(
        network = %engine.network,
        api = %engine.ledger.base_url,
        poll_interval_secs = engine.reconciler.poll_interval_secs,
        "Starting kaspa-pay-watcher"
    );

    let ledger = Arc::new(RestLedgerApi::new(engine.ledger.clone()).context("failed to build ledger client")?);
    let controller = PaymentController::new(engine, ledger, WalletRegistry::new())
        .context("invalid engine configuration")?;
    let mut events = controller.subscribe();

    let session_id = controller
        .open(OpenOptions::new(address).amount(&amount).item(config.item.clone()))
        .await
        .context("failed to open payment session")?;
    let snapshot = controller
        .snapshot()
        .await
        .context("payment session vanished after opening")?;

    println!("{}", pay_button_label(Some(snapshot.amount_kas)));
    println!("Item:        {}", snapshot.item);
    println!("Amount:      {} KAS ({} sompi)", snapshot.amount_label, snapshot.amount_sompi);
    println!("Address:     {}", snapshot.address);
    println!("Payment URI: {}", snapshot.payment_uri);
    println!("QR image:    {}", snapshot.qr_image_url);

    let end = tokio::select! {
        end = wait_for_end(&mut events, session_id, config.json_events) => end?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Interrupted, closing payment session");
            controller.close().await;
            WatchEnd::Closed
        }
    };

    match end {
        WatchEnd::Paid { txid } => {
            println!("Paid:        {}", txid);
            println!("Explorer:    {}", explorer_tx_url(&txid));
            Ok(())
        }
        WatchEnd::Expired => bail!(
            "no matching payment seen within {} seconds",
            config.timeout_secs
        ),
        WatchEnd::Closed => Ok(()),
    }
}

/// Follow events until `session_id` is paid, expires or closes.
async fn wait_for_end(
    events: &mut broadcast::Receiver<SessionEvent>,
    session_id: SessionId,
    json: bool,
) -> Result<WatchEnd> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => bail!("payment engine stopped"),
        };

        if json {
            println!("{}", serde_json::to_string(&event)?);
        }

        match event {
            SessionEvent::Paid { session_id: id, txid, .. } if id == session_id => {
                return Ok(WatchEnd::Paid { txid })
            }
            SessionEvent::PollingExpired { session_id: id } if id == session_id => {
                return Ok(WatchEnd::Expired)
            }
            SessionEvent::Closed { session_id: id } if id == session_id => return Ok(WatchEnd::Closed),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_end_ignores_other_sessions() {
        let (tx, mut rx) = broadcast::channel(8);
        let mine = SessionId(2);
        tx.send(SessionEvent::Closed { session_id: SessionId(1) }).unwrap();
        tx.send(SessionEvent::Paid {
            session_id: mine,
            txid: "tx9".into(),
            source: kaspa_pay::PaymentSource::Ledger,
        })
        .unwrap();

        let end = wait_for_end(&mut rx, mine, false).await.unwrap();
        assert_eq!(end, WatchEnd::Paid { txid: "tx9".into() });
    }

    #[tokio::test]
    async fn test_wait_for_end_reports_expiry() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(SessionEvent::PollingExpired { session_id: SessionId(1) }).unwrap();
        assert_eq!(wait_for_end(&mut rx, SessionId(1), true).await.unwrap(), WatchEnd::Expired);
    }

    #[tokio::test]
    async fn test_wait_for_end_fails_when_engine_gone() {
        let (tx, mut rx) = broadcast::channel::<SessionEvent>(8);
        drop(tx);
        assert!(wait_for_end(&mut rx, SessionId(1), false).await.is_err());
    }
}
