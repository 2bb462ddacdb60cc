//! Blockchain notarization of credential hashes.
//!
//! A [`Notary`] records `(credential_hash, student_wallet)` on a ledger. The
//! [`advance`] step function moves a credential's [`Notarization`] record one
//! step forward; both the inline attempt at issuance and the background
//! [`NotarizationWorker`] go through it.

use crate::crypto::hashing::parse_h256_hex;
use crate::domain::account::WalletAddress;
use crate::domain::credential::{Credential, Notarization, NotarizationState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use primitive_types::H256;
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

pub mod worker;

pub use worker::NotarizationWorker;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum NotaryError {
    /// Transient: the ledger could not be reached. Retried.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// Permanent: the ledger refused the transaction.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// The ledger answered with something we could not interpret. Retried.
    #[error("invalid ledger response: {0}")]
    InvalidResponse(String),
}

impl NotaryError {
    pub fn is_transient(&self) -> bool {
        !matches!(self, NotaryError::Rejected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChainStatus {
    /// Submitted but not yet mined.
    Pending,
    Confirmed { block_number: u64, confirmations: u64 },
    /// Mined but reverted.
    Failed { block_number: Option<u64> },
    /// The ledger does not know the transaction.
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotaryReceipt {
    pub tx_hash: String,
    pub status: ChainStatus,
}

#[async_trait]
pub trait Notary: Send + Sync {
    /// Short name used in logs and `/health`.
    fn name(&self) -> &str;
    async fn submit(&self, credential_hash: H256, student: &WalletAddress) -> Result<NotaryReceipt, NotaryError>;
    async fn status(&self, tx_hash: &str) -> Result<ChainStatus, NotaryError>;
}

/// One notarization step for `credential`. Returns the record to persist.
///
/// Settled records (`confirmed`, `failed`) are returned unchanged. A pending
/// record is submitted; a submitted one is polled. Transient errors count as
/// an attempt and keep the record retryable until `max_attempts` is reached.
pub async fn advance(
    notary: &dyn Notary,
    credential: &Credential,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> Notarization {
    let mut n = credential.notarization.clone();
    match n.state {
        NotarizationState::Confirmed | NotarizationState::Failed => return n,
        NotarizationState::Submitted => {
            if let Some(tx_hash) = n.tx_hash.clone() {
                match notary.status(&tx_hash).await {
                    Ok(status) => {
                        if matches!(status, ChainStatus::Failed { .. } | ChainStatus::Unknown) {
                            n.attempts = n.attempts.saturating_add(1);
                        }
                        apply_status(&mut n, status, max_attempts);
                    }
                    Err(e) => record_failure(&mut n, &e, max_attempts),
                }
                n.updated_at = now;
                return n;
            }
            // A submitted record without a hash cannot be polled; submit again.
            n.state = NotarizationState::Pending;
        }
        NotarizationState::Pending => {}
    }

    let hash = match parse_h256_hex(&credential.credential_hash) {
        Ok(h) => h,
        Err(e) => {
            n.state = NotarizationState::Failed;
            n.last_error = Some(format!("stored credential hash is malformed: {}", e));
            n.updated_at = now;
            return n;
        }
    };

    match notary.submit(hash, &credential.student_wallet).await {
        Ok(receipt) => {
            n.attempts = n.attempts.saturating_add(1);
            n.tx_hash = Some(receipt.tx_hash);
            apply_status(&mut n, receipt.status, max_attempts);
        }
        Err(e) => record_failure(&mut n, &e, max_attempts),
    }
    n.updated_at = now;
    n
}

/// Maps a ledger status onto the record. The caller has already counted the attempt.
fn apply_status(n: &mut Notarization, status: ChainStatus, max_attempts: u32) {
    match status {
        ChainStatus::Pending => {
            n.state = NotarizationState::Submitted;
        }
        ChainStatus::Confirmed { block_number, .. } => {
            n.state = NotarizationState::Confirmed;
            n.block_number = Some(block_number);
            n.last_error = None;
        }
        ChainStatus::Failed { block_number } => {
            n.block_number = block_number;
            n.tx_hash = None;
            n.last_error = Some("transaction reverted".to_string());
            n.state = if n.attempts >= max_attempts {
                NotarizationState::Failed
            } else {
                NotarizationState::Pending
            };
        }
        ChainStatus::Unknown => {
            // Dropped from the mempool; resubmit on the next pass.
            n.tx_hash = None;
            n.last_error = Some("transaction not found on ledger".to_string());
            n.state = if n.attempts >= max_attempts {
                NotarizationState::Failed
            } else {
                NotarizationState::Pending
            };
        }
    }
}

fn record_failure(n: &mut Notarization, err: &NotaryError, max_attempts: u32) {
    n.attempts = n.attempts.saturating_add(1);
    n.last_error = Some(err.to_string());
    if !err.is_transient() || n.attempts >= max_attempts {
        n.state = NotarizationState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credential::{CredentialStatus, SigningMode};
    use std::sync::Mutex;

    struct Scripted {
        submits: Mutex<Vec<Result<NotaryReceipt, NotaryError>>>,
        statuses: Mutex<Vec<Result<ChainStatus, NotaryError>>>,
    }

    impl Scripted {
        fn new(
            submits: Vec<Result<NotaryReceipt, NotaryError>>,
            statuses: Vec<Result<ChainStatus, NotaryError>>,
        ) -> Self {
            Self {
                submits: Mutex::new(submits),
                statuses: Mutex::new(statuses),
            }
        }
    }

    #[async_trait]
    impl Notary for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn submit(&self, _: H256, _: &WalletAddress) -> Result<NotaryReceipt, NotaryError> {
            self.submits.lock().unwrap().remove(0)
        }
        async fn status(&self, _: &str) -> Result<ChainStatus, NotaryError> {
            self.statuses.lock().unwrap().remove(0)
        }
    }

    fn credential() -> Credential {
        let w = WalletAddress::parse("0x00000000000000000000000000000000000000aa").unwrap();
        Credential {
            credential_id: "c-1".into(),
            title: "Diploma".into(),
            purpose: String::new(),
            document_path: "documents/x.pdf".into(),
            document_digest: None,
            issuer_wallet: w.clone(),
            student_wallet: w,
            signing_mode: SigningMode::SelfSign,
            signers: vec![],
            signature_fields: vec![],
            status: CredentialStatus::Pending,
            credential_hash: format!("0x{}", "11".repeat(32)),
            notarization: Notarization::pending(Utc::now()),
            issued_at: Utc::now(),
            completed_at: None,
        }
    }

    fn receipt(status: ChainStatus) -> Result<NotaryReceipt, NotaryError> {
        Ok(NotaryReceipt {
            tx_hash: "0xabc".into(),
            status,
        })
    }

    #[tokio::test]
    async fn confirmed_on_first_submit() {
        let notary = Scripted::new(
            vec![receipt(ChainStatus::Confirmed {
                block_number: 7,
                confirmations: 1,
            })],
            vec![],
        );
        let n = advance(&notary, &credential(), 5, Utc::now()).await;
        assert_eq!(n.state, NotarizationState::Confirmed);
        assert_eq!(n.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(n.block_number, Some(7));
        assert_eq!(n.attempts, 1);
    }

    #[tokio::test]
    async fn submitted_then_confirmed_by_polling() {
        let notary = Scripted::new(
            vec![receipt(ChainStatus::Pending)],
            vec![Ok(ChainStatus::Confirmed {
                block_number: 9,
                confirmations: 2,
            })],
        );
        let mut c = credential();
        c.notarization = advance(&notary, &c, 5, Utc::now()).await;
        assert_eq!(c.notarization.state, NotarizationState::Submitted);
        c.notarization = advance(&notary, &c, 5, Utc::now()).await;
        assert_eq!(c.notarization.state, NotarizationState::Confirmed);
        assert_eq!(c.notarization.block_number, Some(9));
    }

    #[tokio::test]
    async fn transient_errors_retry_until_limit() {
        let notary = Scripted::new(
            vec![
                Err(NotaryError::Unavailable("down".into())),
                Err(NotaryError::Unavailable("down".into())),
            ],
            vec![],
        );
        let mut c = credential();
        c.notarization = advance(&notary, &c, 2, Utc::now()).await;
        assert_eq!(c.notarization.state, NotarizationState::Pending);
        assert_eq!(c.notarization.attempts, 1);
        assert!(c.notarization.last_error.as_deref().unwrap().contains("down"));
        c.notarization = advance(&notary, &c, 2, Utc::now()).await;
        assert_eq!(c.notarization.state, NotarizationState::Failed);
        assert_eq!(c.notarization.attempts, 2);
    }

    #[tokio::test]
    async fn rejection_is_permanent() {
        let notary = Scripted::new(vec![Err(NotaryError::Rejected("bad".into()))], vec![]);
        let n = advance(&notary, &credential(), 5, Utc::now()).await;
        assert_eq!(n.state, NotarizationState::Failed);
    }

    #[tokio::test]
    async fn reverted_transaction_is_resubmitted() {
        let notary = Scripted::new(
            vec![receipt(ChainStatus::Pending)],
            vec![Ok(ChainStatus::Failed { block_number: Some(3) })],
        );
        let mut c = credential();
        c.notarization = advance(&notary, &c, 5, Utc::now()).await;
        c.notarization = advance(&notary, &c, 5, Utc::now()).await;
        assert_eq!(c.notarization.state, NotarizationState::Pending);
        assert_eq!(c.notarization.tx_hash, None);
        assert_eq!(c.notarization.attempts, 2);
    }

    #[tokio::test]
    async fn settled_records_are_untouched() {
        let notary = Scripted::new(vec![], vec![]);
        let mut c = credential();
        c.notarization.state = NotarizationState::Confirmed;
        let before = c.notarization.clone();
        assert_eq!(advance(&notary, &c, 5, Utc::now()).await, before);
    }
}
