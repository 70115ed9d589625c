//! Kaspa addresses and networks

use serde::{Deserialize, Serialize};

use crate::{KaspaPayError, KaspaPayResult};

/// Kaspa network selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Kaspa mainnet
    #[default]
    Mainnet,
    /// Kaspa testnet
    Testnet,
}

impl Network {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }

    /// Address prefix, including the separator
    pub fn address_prefix(&self) -> &'static str {
        match self {
            Network::Mainnet => "kaspa:",
            Network::Testnet => "kaspatest:",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet" | "test" => Some(Network::Testnet),
            _ => None,
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment target address that carries its network prefix.
///
/// Only the prefix and a non-empty payload are checked; the engine never
/// decodes the bech32 body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct KaspaAddress(String);

impl KaspaAddress {
    /// Validate `raw` against the prefix convention of `network`.
    pub fn parse(raw: &str, network: Network) -> KaspaPayResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(KaspaPayError::InvalidAddress("address is required".into()));
        }

        let prefix = network.address_prefix();
        let Some(payload) = raw.strip_prefix(prefix) else {
            return Err(KaspaPayError::InvalidAddress(format!(
                "{} address must start with '{}'",
                network, prefix
            )));
        };

        if payload.is_empty() {
            return Err(KaspaPayError::InvalidAddress(format!(
                "address has no payload after '{}'",
                prefix
            )));
        }
        if payload.chars().any(|c| c.is_whitespace() || c == '?' || c == '&') {
            return Err(KaspaPayError::InvalidAddress(format!(
                "address contains invalid characters: {}",
                raw
            )));
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KaspaAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for KaspaAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_address_accepted() {
        let address = KaspaAddress::parse("kaspa:qr0lr4ml9fn3chekrqmjdkergxl93l4wrk3dankcgvjq776s9wn9jkdskewva", Network::Mainnet)
            .unwrap();
        assert!(address.as_str().starts_with("kaspa:"));
    }

    #[test]
    fn test_malformed_addresses_rejected() {
        for raw in ["", "   ", "qr0lr4ml9f", "kaspa:", "bitcoin:bc1q", "kaspatest:qq", "kaspa:qq x", "kaspa:qq?amount=1"] {
            assert!(
                matches!(KaspaAddress::parse(raw, Network::Mainnet), Err(KaspaPayError::InvalidAddress(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_testnet_prefix() {
        assert!(KaspaAddress::parse("kaspatest:qqabc", Network::Testnet).is_ok());
        assert!(KaspaAddress::parse("kaspa:qqabc", Network::Testnet).is_err());
    }

    #[test]
    fn test_network_parse() {
        assert_eq!(Network::parse("Mainnet"), Some(Network::Mainnet));
        assert_eq!(Network::parse("test"), Some(Network::Testnet));
        assert_eq!(Network::parse("devnet"), None);
        assert_eq!(Network::default().address_prefix(), "kaspa:");
    }
}
