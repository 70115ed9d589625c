//! Wallet invocation adapter
//!
//! Browser wallets expose a `sendKaspa(address, sompi)` style call. Each one
//! present in the environment is registered as a [`WalletCapability`]; a
//! missing wallet simply does not appear in the picker.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Known browser-extension wallets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletKind {
    Kasware,
    Kastle,
}

impl WalletKind {
    /// Identifier used by view code (`data-wallet` in the modal)
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletKind::Kasware => "kasware",
            WalletKind::Kastle => "kastle",
        }
    }

    /// Name shown in the picker
    pub fn display_name(&self) -> &'static str {
        match self {
            WalletKind::Kasware => "Kasware",
            WalletKind::Kastle => "Kastle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kasware" => Some(WalletKind::Kasware),
            "kastle" => Some(WalletKind::Kastle),
            _ => None,
        }
    }
}

impl std::fmt::Display for WalletKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A failed wallet send, carrying the reason shown to the payer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct WalletError {
    pub message: String,
}

impl WalletError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The requested wallet is not present
    pub fn unavailable(kind: WalletKind) -> Self {
        Self::new(format!("{} wallet is not available", kind.display_name()))
    }
}

/// Direct-send capability of a wallet present in the environment.
#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// Which wallet this is
    fn kind(&self) -> WalletKind;

    /// Ask the wallet to send `amount_sompi` to `address`.
    ///
    /// Resolves with the transaction id, or with the reason the payer or the
    /// wallet refused.
    async fn send_transfer(&self, address: &str, amount_sompi: u64) -> Result<String, WalletError>;
}

/// Where the modal is shown; decides which picker options make sense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Desktop,
    Mobile,
}

/// One entry of the wallet picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PickerOption {
    /// Browser extension with a direct-send capability
    Extension {
        kind: WalletKind,
        name: &'static str,
        description: &'static str,
    },
    /// Hand the payment URI to a wallet app on the device
    AppLink {
        uri: String,
        name: &'static str,
        description: &'static str,
    },
}

/// The wallet capabilities present in the environment
#[derive(Clone, Default)]
pub struct WalletRegistry {
    wallets: Vec<Arc<dyn WalletCapability>>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability, replacing any earlier one of the same kind
    pub fn with_wallet(mut self, wallet: Arc<dyn WalletCapability>) -> Self {
        self.register(wallet);
        self
    }

    pub fn register(&mut self, wallet: Arc<dyn WalletCapability>) {
        let kind = wallet.kind();
        self.wallets.retain(|w| w.kind() != kind);
        self.wallets.push(wallet);
    }

    pub fn get(&self, kind: WalletKind) -> Option<Arc<dyn WalletCapability>> {
        self.wallets.iter().find(|w| w.kind() == kind).cloned()
    }

    /// Kinds present, in registration order
    pub fn kinds(&self) -> Vec<WalletKind> {
        self.wallets.iter().map(|w| w.kind()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Picker entries for `platform`.
    ///
    /// Extensions are only offered on desktop; mobile gets a single app link
    /// for `payment_uri` instead.
    pub fn picker_options(&self, platform: Platform, payment_uri: &str) -> Vec<PickerOption> {
        match platform {
            Platform::Desktop => self
                .wallets
                .iter()
                .map(|w| {
                    let kind = w.kind();
                    PickerOption::Extension {
                        kind,
                        name: kind.display_name(),
                        description: "Browser extension",
                    }
                })
                .collect(),
            Platform::Mobile => vec![PickerOption::AppLink {
                uri: payment_uri.to_string(),
                name: "Open Wallet App",
                description: "Kaspa-compatible wallet",
            }],
        }
    }

    /// Run a single send through the `kind` capability.
    ///
    /// No retries. A missing capability or an empty transaction id is
    /// reported as a failure like any wallet rejection.
    pub async fn send(
        &self,
        kind: WalletKind,
        address: &str,
        amount_sompi: u64,
    ) -> Result<String, WalletError> {
        let wallet = self.get(kind).ok_or_else(|| WalletError::unavailable(kind))?;
        let txid = wallet.send_transfer(address, amount_sompi).await?;
        if txid.trim().is_empty() {
            return Err(WalletError::new("wallet returned no transaction id"));
        }
        Ok(txid)
    }
}

impl std::fmt::Debug for WalletRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletRegistry")
            .field("wallets", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedWallet {
        kind: WalletKind,
        reply: Result<String, WalletError>,
        calls: Mutex<Vec<(String, u64)>>,
    }

    impl FixedWallet {
        fn new(kind: WalletKind, reply: Result<String, WalletError>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                reply,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl WalletCapability for FixedWallet {
        fn kind(&self) -> WalletKind {
            self.kind
        }

        async fn send_transfer(&self, address: &str, amount_sompi: u64) -> Result<String, WalletError> {
            self.calls.lock().unwrap().push((address.to_string(), amount_sompi));
            self.reply.clone()
        }
    }

    #[tokio::test]
    async fn test_send_passes_address_and_sompi() {
        let wallet = FixedWallet::new(WalletKind::Kasware, Ok("tx1".into()));
        let registry = WalletRegistry::new().with_wallet(wallet.clone());

        let txid = registry.send(WalletKind::Kasware, "kaspa:qq", 500_000_000).await.unwrap();

        assert_eq!(txid, "tx1");
        assert_eq!(*wallet.calls.lock().unwrap(), vec![("kaspa:qq".to_string(), 500_000_000)]);
    }

    #[tokio::test]
    async fn test_missing_wallet_is_a_failure() {
        let registry = WalletRegistry::new();
        let err = registry.send(WalletKind::Kastle, "kaspa:qq", 1).await.unwrap_err();
        assert_eq!(err.message, "Kastle wallet is not available");
    }

    #[tokio::test]
    async fn test_empty_txid_is_a_failure() {
        let registry = WalletRegistry::new().with_wallet(FixedWallet::new(WalletKind::Kastle, Ok("  ".into())));
        assert!(registry.send(WalletKind::Kastle, "kaspa:qq", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_rejection_passes_through() {
        let registry = WalletRegistry::new()
            .with_wallet(FixedWallet::new(WalletKind::Kasware, Err(WalletError::new("User rejected"))));
        let err = registry.send(WalletKind::Kasware, "kaspa:qq", 1).await.unwrap_err();
        assert_eq!(err.to_string(), "User rejected");
    }

    #[test]
    fn test_picker_options_by_platform() {
        let registry = WalletRegistry::new()
            .with_wallet(FixedWallet::new(WalletKind::Kasware, Ok("a".into())))
            .with_wallet(FixedWallet::new(WalletKind::Kastle, Ok("b".into())));

        let desktop = registry.picker_options(Platform::Desktop, "kaspa:qq?amount=1");
        assert_eq!(desktop.len(), 2);
        assert!(matches!(desktop[0], PickerOption::Extension { kind: WalletKind::Kasware, .. }));

        let mobile = registry.picker_options(Platform::Mobile, "kaspa:qq?amount=1");
        assert_eq!(
            mobile,
            vec![PickerOption::AppLink {
                uri: "kaspa:qq?amount=1".into(),
                name: "Open Wallet App",
                description: "Kaspa-compatible wallet",
            }]
        );

        assert!(WalletRegistry::new().picker_options(Platform::Desktop, "x").is_empty());
    }

    #[test]
    fn test_register_replaces_same_kind() {
        let mut registry = WalletRegistry::new();
        registry.register(FixedWallet::new(WalletKind::Kasware, Ok("a".into())));
        registry.register(FixedWallet::new(WalletKind::Kasware, Ok("b".into())));
        assert_eq!(registry.kinds(), vec![WalletKind::Kasware]);
    }
}
