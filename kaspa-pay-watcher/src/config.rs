//! Watcher configuration.

use std::env;

use anyhow::{anyhow, Context, Result};
use kaspa_pay::{EngineConfig, LedgerApiConfig, Network, QrConfig, ReconcilerConfig, DEFAULT_ITEM_LABEL};

use crate::Cli;

/// Watcher configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct WatcherConfig {
    /// Address to watch.
    pub address: Option<String>,
    /// Requested amount in KAS, as typed.
    pub amount: Option<String>,
    /// Item label.
    pub item: String,
    /// Network whose address prefix is enforced.
    pub network: Network,
    /// Ledger read API root.
    pub api_url: String,
    /// Seconds between UTXO checks.
    pub poll_interval_secs: u64,
    /// Seconds before giving up.
    pub timeout_secs: u64,
    /// Matching tolerance in sompi.
    pub tolerance_sompi: u64,
    /// QR image service.
    pub qr_service_url: String,
    /// Print session events as JSON lines.
    pub json_events: bool,
}

impl WatcherConfig {
    /// Load configuration from `KASPA_PAY_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ledger = LedgerApiConfig::default();
        let reconciler = ReconcilerConfig::default();
        let qr = QrConfig::default();

        let network = match lookup("KASPA_PAY_NETWORK") {
            Some(name) => Network::parse(&name)
                .ok_or_else(|| anyhow!("KASPA_PAY_NETWORK must be mainnet or testnet, got '{name}'"))?,
            None => Network::default(),
        };

        let parse_u64 = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{key} must be a whole number, got '{raw}'")),
                None => Ok(default),
            }
        };

        Ok(Self {
            address: lookup("KASPA_PAY_ADDRESS"),
            amount: lookup("KASPA_PAY_AMOUNT"),
            item: lookup("KASPA_PAY_ITEM").unwrap_or_else(|| DEFAULT_ITEM_LABEL.to_string()),
            network,
            api_url: lookup("KASPA_PAY_API_URL").unwrap_or(ledger.base_url),
            poll_interval_secs: parse_u64("KASPA_PAY_POLL_INTERVAL_SECS", reconciler.poll_interval_secs)?,
            timeout_secs: parse_u64("KASPA_PAY_TIMEOUT_SECS", reconciler.timeout_secs)?,
            tolerance_sompi: parse_u64("KASPA_PAY_TOLERANCE_SOMPI", reconciler.tolerance_sompi)?,
            qr_service_url: lookup("KASPA_PAY_QR_SERVICE_URL").unwrap_or(qr.service_url),
            json_events: false,
        })
    }

    /// Command-line flags win over the environment.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(address) = &cli.address {
            self.address = Some(address.clone());
        }
        if let Some(amount) = &cli.amount {
            self.amount = Some(amount.clone());
        }
        if let Some(item) = &cli.item {
            self.item = item.clone();
        }
        if let Some(network) = cli.network {
            self.network = network.into();
        }
        if let Some(url) = &cli.api_url {
            self.api_url = url.clone();
        }
        if let Some(secs) = cli.poll_interval {
            self.poll_interval_secs = secs;
        }
        if let Some(secs) = cli.timeout {
            self.timeout_secs = secs;
        }
        self.json_events |= cli.json;
        self
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            network: self.network,
            ledger: LedgerApiConfig::default().with_base_url(self.api_url.clone()),
            reconciler: ReconcilerConfig {
                poll_interval_secs: self.poll_interval_secs,
                tolerance_sompi: self.tolerance_sompi,
                timeout_secs: self.timeout_secs,
            },
            qr: QrConfig::default().with_service(self.qr_service_url.clone()),
        }
    }
}
