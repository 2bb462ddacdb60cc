//! Minimal Ethereum JSON-RPC 2.0 client over HTTP.

use crate::domain::notarization::NotaryError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, NotaryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotaryError::Unavailable(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Sends one request and returns its `result` field.
    ///
    /// Transport failures and non-2xx statuses are `Unavailable`; a JSON-RPC
    /// `error` object is `Rejected`.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, NotaryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let resp = self.http.post(&self.url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                NotaryError::Unavailable(format!("{}: request timed out", method))
            } else {
                NotaryError::Unavailable(format!("{}: {}", method, e))
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(NotaryError::Unavailable(format!("{}: HTTP {}", method, status)));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| NotaryError::InvalidResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = payload.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error");
            return Err(NotaryError::Rejected(format!("{}: {}", method, message)));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| NotaryError::InvalidResponse(format!("{}: response has no result", method)))
    }

    pub async fn block_number(&self) -> Result<u64, NotaryError> {
        let v = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&v).ok_or_else(|| NotaryError::InvalidResponse(format!("eth_blockNumber returned {}", v)))
    }

    pub async fn chain_id(&self) -> Result<u64, NotaryError> {
        let v = self.call("eth_chainId", json!([])).await?;
        parse_quantity(&v).ok_or_else(|| NotaryError::InvalidResponse(format!("eth_chainId returned {}", v)))
    }
}

/// Parses a JSON-RPC hex quantity such as `"0x1b4"`.
pub fn parse_quantity(v: &Value) -> Option<u64> {
    let s = v.as_str()?.strip_prefix("0x")?;
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity(&json!("0x0")), Some(0));
        assert_eq!(parse_quantity(&json!("0x1b4")), Some(436));
        assert_eq!(parse_quantity(&json!("0x")), None);
        assert_eq!(parse_quantity(&json!("12")), None);
        assert_eq!(parse_quantity(&json!(12)), None);
    }
}
