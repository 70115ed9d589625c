//! Payment URI, QR image and explorer links
//!
//! The QR image itself is rendered by an external service; the engine only
//! builds the request URL for it.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::amount::format_kas;
use crate::KaspaAddress;

/// Characters left unescaped by `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Block explorer transaction page prefix
pub const EXPLORER_TX_BASE: &str = "https://explorer.kaspa.org/txs/";

/// External QR image service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrConfig {
    /// Service endpoint, queried with `size` and `data` parameters
    #[serde(default = "default_qr_service_url")]
    pub service_url: String,
    /// Square image edge in pixels
    #[serde(default = "default_qr_size")]
    pub size: u32,
}

fn default_qr_service_url() -> String {
    "https://api.qrserver.com/v1/create-qr-code/".to_string()
}

fn default_qr_size() -> u32 {
    180
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            service_url: default_qr_service_url(),
            size: default_qr_size(),
        }
    }
}

impl QrConfig {
    /// Use a custom QR service
    pub fn with_service(mut self, url: impl Into<String>) -> Self {
        self.service_url = url.into();
        self
    }

    /// Set the image size
    pub fn with_size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }
}

/// Build the payment URI scanned by mobile wallets: `<address>?amount=<kas>`.
pub fn payment_uri(address: &KaspaAddress, amount_kas: f64) -> String {
    format!("{}?amount={}", address, amount_kas)
}

/// URL of a QR image encoding `data`.
pub fn qr_image_url(config: &QrConfig, data: &str) -> String {
    format!(
        "{}?size={}x{}&data={}",
        config.service_url,
        config.size,
        config.size,
        utf8_percent_encode(data, URI_COMPONENT)
    )
}

/// Explorer page for a confirmed transaction
pub fn explorer_tx_url(txid: &str) -> String {
    format!("{}{}", EXPLORER_TX_BASE, txid)
}

/// Label for the button that opens the payment modal
pub fn pay_button_label(amount_kas: Option<f64>) -> String {
    match amount_kas {
        Some(amount) if amount > 0.0 => format!("Pay {} KAS", format_kas(amount)),
        _ => "Pay with Kaspa".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Network;

    fn address() -> KaspaAddress {
        KaspaAddress::parse("kaspa:qqtestaddress", Network::Mainnet).unwrap()
    }

    #[test]
    fn test_payment_uri() {
        assert_eq!(payment_uri(&address(), 10.0), "kaspa:qqtestaddress?amount=10");
        assert_eq!(payment_uri(&address(), 0.25), "kaspa:qqtestaddress?amount=0.25");
    }

    #[test]
    fn test_qr_image_url_escapes_data() {
        let uri = payment_uri(&address(), 1.5);
        let url = qr_image_url(&QrConfig::default(), &uri);
        assert_eq!(
            url,
            "https://api.qrserver.com/v1/create-qr-code/?size=180x180&data=kaspa%3Aqqtestaddress%3Famount%3D1.5"
        );
    }

    #[test]
    fn test_qr_custom_service() {
        let config = QrConfig::default().with_service("https://qr.example/render").with_size(256);
        let url = qr_image_url(&config, "a b(c)");
        assert_eq!(url, "https://qr.example/render?size=256x256&data=a%20b(c)");
    }

    #[test]
    fn test_explorer_url() {
        assert_eq!(explorer_tx_url("abc123"), "https://explorer.kaspa.org/txs/abc123");
    }

    #[test]
    fn test_pay_button_label() {
        assert_eq!(pay_button_label(Some(1500.0)), "Pay 1,500 KAS");
        assert_eq!(pay_button_label(Some(0.0)), "Pay with Kaspa");
        assert_eq!(pay_button_label(None), "Pay with Kaspa");
    }
}
