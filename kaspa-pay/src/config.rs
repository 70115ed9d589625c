//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::ledger::LedgerApiConfig;
use crate::reconciler::ReconcilerConfig;
use crate::uri::QrConfig;
use crate::{KaspaPayResult, Network};

/// Everything a [`crate::PaymentController`] needs besides its ledger and
/// wallets. Every section falls back to its defaults when omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Network whose address prefix `open` enforces
    #[serde(default)]
    pub network: Network,

    #[serde(default)]
    pub ledger: LedgerApiConfig,

    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub qr: QrConfig,
}

impl EngineConfig {
    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    pub fn with_ledger(mut self, ledger: LedgerApiConfig) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_reconciler(mut self, reconciler: ReconcilerConfig) -> Self {
        self.reconciler = reconciler;
        self
    }

    pub fn with_qr(mut self, qr: QrConfig) -> Self {
        self.qr = qr;
        self
    }

    pub fn validate(&self) -> KaspaPayResult<()> {
        self.reconciler.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.ledger.base_url, "https://api.kaspa.org");
        assert_eq!(config.reconciler.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.qr.size, 180);
    }

    #[test]
    fn test_partial_sections() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"network":"testnet","reconciler":{"poll_interval_secs":2},"ledger":{"base_url":"http://localhost:8000"}}"#,
        )
        .unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.reconciler.poll_interval_secs, 2);
        assert_eq!(config.reconciler.timeout_secs, 1800);
        assert_eq!(config.ledger.request_timeout_secs, 30);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let config = EngineConfig::default()
            .with_reconciler(ReconcilerConfig::default().with_poll_interval(Duration::ZERO));
        assert!(config.validate().is_err());
    }
}
