//! SePay user API client.
//!
//! Only the transaction list is used: we poll the bank account's latest incoming
//! transfers and look for the payment code in the transfer content.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::{ACCEPT, AUTHORIZATION};
use hyper::{Method, Request};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;

use crate::config::PaymentConfig;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment gateway is not configured (payment.api_token is empty)")]
    NotConfigured,
    #[error("request to payment gateway failed: {0}")]
    Transport(String),
    #[error("payment gateway did not answer within {0}s")]
    Timeout(u64),
    #[error("payment gateway answered with HTTP {0}")]
    Status(u16),
    #[error("unexpected payment gateway response: {0}")]
    Decode(String),
}

/// One incoming transfer on the library's bank account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankTransaction {
    pub id: String,
    /// Whole VND.
    pub amount_in: i64,
    pub content: String,
    pub reference: Option<String>,
    pub transaction_date: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Latest incoming transactions, newest first.
    async fn recent_transactions(&self) -> Result<Vec<BankTransaction>, GatewayError>;
}

type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Empty<Bytes>>;

pub struct SePayClient {
    client: HttpsClient,
    api_base: String,
    api_token: String,
    account_number: String,
    limit: u32,
    timeout: Duration,
}

impl SePayClient {
    pub fn new(cfg: &PaymentConfig) -> anyhow::Result<Self> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(60))
            .build(https);

        let api_base = cfg.api_base.trim_end_matches('/').to_string();
        if !api_base.starts_with("https://") && !api_base.starts_with("http://") {
            return Err(anyhow::anyhow!("payment.api_base must be an http(s) URL: {}", cfg.api_base));
        }

        Ok(Self {
            client,
            api_base,
            api_token: cfg.api_token.trim().to_string(),
            account_number: cfg.account_number.trim().to_string(),
            limit: cfg.transaction_limit,
            timeout: Duration::from_secs(cfg.request_timeout_secs),
        })
    }

    fn transactions_uri(&self) -> String {
        let mut uri = format!("{}/transactions/list?limit={}", self.api_base, self.limit);
        if !self.account_number.is_empty() {
            uri.push_str("&account_number=");
            uri.push_str(&self.account_number);
        }
        uri
    }
}

#[async_trait]
impl PaymentGateway for SePayClient {
    async fn recent_transactions(&self) -> Result<Vec<BankTransaction>, GatewayError> {
        if self.api_token.is_empty() {
            return Err(GatewayError::NotConfigured);
        }

        let req = Request::builder()
            .method(Method::GET)
            .uri(self.transactions_uri())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_token))
            .header(ACCEPT, "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let secs = self.timeout.as_secs();
        let res = tokio::time::timeout(self.timeout, self.client.request(req))
            .await
            .map_err(|_| GatewayError::Timeout(secs))?
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }

        let body = tokio::time::timeout(self.timeout, res.into_body().collect())
            .await
            .map_err(|_| GatewayError::Timeout(secs))?
            .map_err(|e| GatewayError::Transport(e.to_string()))?
            .to_bytes();

        let txs = parse_transactions(&body)?;
        tracing::debug!("SePay returned {} transactions", txs.len());
        Ok(txs)
    }
}

#[derive(Deserialize)]
struct ListResponse {
    status: Option<u16>,
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

// SePay sends ids and amounts as strings ("2277000.00"), sometimes as numbers.
#[derive(Deserialize)]
struct RawTransaction {
    id: serde_json::Value,
    #[serde(default)]
    amount_in: serde_json::Value,
    #[serde(default)]
    transaction_content: Option<String>,
    #[serde(default)]
    reference_number: Option<String>,
    #[serde(default)]
    transaction_date: Option<String>,
}

fn value_to_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_amount(v: &serde_json::Value) -> Option<i64> {
    let amount = match v {
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok()?,
        serde_json::Value::Number(n) => n.as_f64()?,
        serde_json::Value::Null => return Some(0),
        _ => return None,
    };
    if !amount.is_finite() || amount < 0.0 {
        return None;
    }
    Some(amount.trunc() as i64)
}

pub fn parse_transactions(body: &[u8]) -> Result<Vec<BankTransaction>, GatewayError> {
    let parsed: ListResponse = serde_json::from_slice(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
    if let Some(status) = parsed.status {
        if status != 200 {
            return Err(GatewayError::Status(status));
        }
    }

    let mut out = Vec::with_capacity(parsed.transactions.len());
    for raw in parsed.transactions {
        let id = value_to_string(&raw.id).ok_or_else(|| GatewayError::Decode("transaction without id".to_string()))?;
        let amount_in = parse_amount(&raw.amount_in)
            .ok_or_else(|| GatewayError::Decode(format!("invalid amount_in on transaction {}", id)))?;
        out.push(BankTransaction {
            id,
            amount_in,
            content: raw.transaction_content.unwrap_or_default(),
            reference: raw.reference_number,
            transaction_date: raw.transaction_date,
        });
    }
    Ok(out)
}
