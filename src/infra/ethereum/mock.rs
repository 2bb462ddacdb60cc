//! In-process ledger for development runs without a chain and for tests.
//!
//! Every submission is "mined" immediately into a new block with a
//! pseudo-random transaction hash.

use crate::domain::account::WalletAddress;
use crate::domain::notarization::{ChainStatus, Notary, NotaryError, NotaryReceipt};
use async_trait::async_trait;
use primitive_types::H256;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Ledger {
    head: u64,
    /// Transaction hash to the block that mined it.
    transactions: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MockNotary {
    ledger: RwLock<Ledger>,
    offline: AtomicBool,
}

impl MockNotary {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails with [`NotaryError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of transactions mined so far.
    pub async fn len(&self) -> usize {
        self.ledger.read().await.transactions.len()
    }

    fn check_online(&self) -> Result<(), NotaryError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(NotaryError::Unavailable("mock ledger is offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notary for MockNotary {
    fn name(&self) -> &str {
        "mock"
    }

    async fn submit(&self, _credential_hash: H256, _student: &WalletAddress) -> Result<NotaryReceipt, NotaryError> {
        self.check_online()?;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let tx_hash = format!("0x{}", hex::encode(bytes));

        let mut ledger = self.ledger.write().await;
        ledger.head += 1;
        let block_number = ledger.head;
        ledger.transactions.insert(tx_hash.clone(), block_number);
        Ok(NotaryReceipt {
            tx_hash,
            status: ChainStatus::Confirmed {
                block_number,
                confirmations: 1,
            },
        })
    }

    async fn status(&self, tx_hash: &str) -> Result<ChainStatus, NotaryError> {
        self.check_online()?;
        let ledger = self.ledger.read().await;
        Ok(match ledger.transactions.get(tx_hash) {
            Some(&block_number) => ChainStatus::Confirmed {
                block_number,
                confirmations: ledger.head - block_number + 1,
            },
            None => ChainStatus::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_reports() {
        let notary = MockNotary::new();
        let student = WalletAddress::parse("0x00000000000000000000000000000000000000cc").unwrap();
        let first = notary.submit(H256::repeat_byte(7), &student).await.unwrap();
        let second = notary.submit(H256::repeat_byte(8), &student).await.unwrap();
        assert_ne!(first.tx_hash, second.tx_hash);

        assert_eq!(
            notary.status(&first.tx_hash).await.unwrap(),
            ChainStatus::Confirmed {
                block_number: 1,
                confirmations: 2
            }
        );
        assert_eq!(notary.status("0xdead").await.unwrap(), ChainStatus::Unknown);
        assert_eq!(
            notary.status(&second.tx_hash).await.unwrap(),
            ChainStatus::Confirmed {
                block_number: 2,
                confirmations: 1
            }
        );
        assert_eq!(notary.len().await, 2);
    }

    #[tokio::test]
    async fn offline_mode() {
        let notary = MockNotary::new();
        notary.set_offline(true);
        let student = WalletAddress::parse("0x00000000000000000000000000000000000000cc").unwrap();
        assert!(matches!(
            notary.submit(H256::zero(), &student).await,
            Err(NotaryError::Unavailable(_))
        ));
        notary.set_offline(false);
        assert!(notary.submit(H256::zero(), &student).await.is_ok());
        assert_eq!(notary.len().await, 1);
    }
}
