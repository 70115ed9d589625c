//! Ledger read API boundary
//!
//! The reconciler only needs two reads per address: the aggregate balance and
//! the current UTXO set. [`RestLedgerApi`] talks to the public Kaspa REST API;
//! tests substitute their own [`LedgerApi`] implementations.

use std::time::Duration;

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::{KaspaPayError, KaspaPayResult};

/// Escaped in the address path segment; the `kaspa:` separator stays literal.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b':');

/// An unspent output paying the watched address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    /// Transaction that created the output
    pub transaction_id: String,
    /// Output value in sompi
    pub amount_sompi: u64,
}

impl UtxoRecord {
    pub fn new(transaction_id: impl Into<String>, amount_sompi: u64) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            amount_sompi,
        }
    }
}

/// Read access to address state on the ledger.
#[async_trait]
pub trait LedgerApi: Send + Sync {
    /// Aggregate balance of `address` in sompi
    async fn balance(&self, address: &str) -> KaspaPayResult<u64>;

    /// Current UTXO set of `address`, in the order the source returns it
    async fn utxos(&self, address: &str) -> KaspaPayResult<Vec<UtxoRecord>>;
}

/// REST API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerApiConfig {
    /// API root (e.g., "https://api.kaspa.org")
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.kaspa.org".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for LedgerApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl LedgerApiConfig {
    /// Use a custom API root
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---- wire format ----

/// Integers arrive as decimal strings; plain numbers are accepted as well.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireInteger {
    Text(String),
    Number(u64),
}

impl WireInteger {
    fn value(&self) -> Option<u64> {
        match self {
            WireInteger::Text(s) => s.trim().parse().ok(),
            WireInteger::Number(n) => Some(*n),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    balance: Option<WireInteger>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireOutpoint {
    transaction_id: String,
}

#[derive(Debug, Deserialize)]
struct WireUtxoEntry {
    amount: WireInteger,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUtxo {
    outpoint: WireOutpoint,
    utxo_entry: WireUtxoEntry,
}

/// Decode a balance response body. A missing or malformed balance reads as 0.
pub fn decode_balance(body: &str) -> KaspaPayResult<u64> {
    let response: BalanceResponse = serde_json::from_str(body)?;
    Ok(response.balance.and_then(|b| b.value()).unwrap_or(0))
}

/// Decode a UTXO list body, keeping source order.
///
/// Entries whose amount is not an integer are dropped; they can never match.
pub fn decode_utxos(body: &str) -> KaspaPayResult<Vec<UtxoRecord>> {
    let entries: Vec<WireUtxo> = serde_json::from_str(body)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry.utxo_entry.amount.value() {
            Some(amount_sompi) => Some(UtxoRecord {
                transaction_id: entry.outpoint.transaction_id,
                amount_sompi,
            }),
            None => {
                tracing::debug!(
                    txid = %entry.outpoint.transaction_id,
                    "Skipping UTXO with unparseable amount"
                );
                None
            }
        })
        .collect())
}

/// [`LedgerApi`] over the public Kaspa REST API
#[derive(Clone)]
pub struct RestLedgerApi {
    base_url: String,
    client: reqwest::Client,
}

impl RestLedgerApi {
    /// Create a client for the configured API root
    pub fn new(config: LedgerApiConfig) -> KaspaPayResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(KaspaPayError::Config("ledger API base URL is empty".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn address_url(&self, address: &str, resource: &str) -> String {
        format!(
            "{}/addresses/{}/{}",
            self.base_url,
            utf8_percent_encode(address, PATH_SEGMENT),
            resource
        )
    }

    async fn get_text(&self, url: String) -> KaspaPayResult<String> {
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(KaspaPayError::ApiStatus {
                status: status.as_u16(),
                url,
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl LedgerApi for RestLedgerApi {
    async fn balance(&self, address: &str) -> KaspaPayResult<u64> {
        let body = self.get_text(self.address_url(address, "balance")).await?;
        decode_balance(&body)
    }

    async fn utxos(&self, address: &str) -> KaspaPayResult<Vec<UtxoRecord>> {
        let body = self.get_text(self.address_url(address, "utxos")).await?;
        decode_utxos(&body).map_err(|e| KaspaPayError::ApiResponse(e.to_string()))
    }
}
