//! Notary backed by a credential registry contract on an EVM chain.
//!
//! Transactions go through `eth_sendTransaction` from a provider-managed
//! account; this process never holds a private key. After submitting, the
//! receipt is polled a bounded number of times. A transaction that is still
//! unmined afterwards is reported `Pending` and the worker polls it later.

use super::contract::encode_issue_credential;
use super::rpc::{parse_quantity, JsonRpcClient};
use crate::domain::account::WalletAddress;
use crate::domain::notarization::{ChainStatus, Notary, NotaryError, NotaryReceipt};
use crate::infra::config::ChainConfig;
use async_trait::async_trait;
use primitive_types::H256;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug)]
pub struct EvmNotary {
    rpc: JsonRpcClient,
    contract: WalletAddress,
    from: WalletAddress,
    poll_attempts: u32,
    poll_interval: Duration,
}

impl EvmNotary {
    pub fn new(config: &ChainConfig) -> Result<Self, NotaryError> {
        let contract = WalletAddress::parse(&config.contract_address)
            .map_err(|e| NotaryError::Rejected(format!("invalid contract address: {}", e)))?;
        let from = WalletAddress::parse(&config.from_address)
            .map_err(|e| NotaryError::Rejected(format!("invalid from address: {}", e)))?;
        Ok(Self {
            rpc: JsonRpcClient::new(config.rpc_url.clone(), config.timeout)?,
            contract,
            from,
            poll_attempts: config.receipt_poll_attempts,
            poll_interval: config.receipt_poll_interval,
        })
    }

    async fn receipt_status(&self, tx_hash: &str) -> Result<Option<ChainStatus>, NotaryError> {
        let receipt = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if receipt.is_null() {
            return Ok(None);
        }

        let block_number = receipt.get("blockNumber").and_then(parse_quantity);
        let succeeded = receipt.get("status").and_then(Value::as_str) == Some("0x1");
        if !succeeded {
            return Ok(Some(ChainStatus::Failed { block_number }));
        }
        let block_number = block_number
            .ok_or_else(|| NotaryError::InvalidResponse("receipt has no blockNumber".to_string()))?;
        let head = self.rpc.block_number().await?;
        Ok(Some(ChainStatus::Confirmed {
            block_number,
            confirmations: head.saturating_sub(block_number) + 1,
        }))
    }
}

#[async_trait]
impl Notary for EvmNotary {
    fn name(&self) -> &str {
        "evm"
    }

    async fn submit(&self, credential_hash: H256, student: &WalletAddress) -> Result<NotaryReceipt, NotaryError> {
        let tx = json!({
            "from": self.from.as_str(),
            "to": self.contract.as_str(),
            "data": encode_issue_credential(credential_hash, student),
        });
        let result = self.rpc.call("eth_sendTransaction", json!([tx])).await?;
        let tx_hash = result
            .as_str()
            .filter(|s| s.starts_with("0x") && s.len() == 66)
            .map(str::to_string)
            .ok_or_else(|| NotaryError::InvalidResponse(format!("eth_sendTransaction returned {}", result)))?;

        tracing::debug!(tx_hash = %tx_hash, "credential transaction sent");

        for attempt in 0..self.poll_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.poll_interval).await;
            }
            match self.receipt_status(&tx_hash).await {
                Ok(Some(status)) => return Ok(NotaryReceipt { tx_hash, status }),
                Ok(None) => {}
                // The transaction is out; a flaky receipt lookup must not lose its hash.
                Err(e) => {
                    tracing::warn!(tx_hash = %tx_hash, error = %e, "receipt lookup failed");
                    break;
                }
            }
        }

        Ok(NotaryReceipt {
            tx_hash,
            status: ChainStatus::Pending,
        })
    }

    async fn status(&self, tx_hash: &str) -> Result<ChainStatus, NotaryError> {
        if let Some(status) = self.receipt_status(tx_hash).await? {
            return Ok(status);
        }
        let tx = self
            .rpc
            .call("eth_getTransactionByHash", json!([tx_hash]))
            .await?;
        Ok(if tx.is_null() {
            ChainStatus::Unknown
        } else {
            ChainStatus::Pending
        })
    }
}
