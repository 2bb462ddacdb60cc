//! Persistence: account/session and credential stores plus uploaded documents.
//!
//! [`PostgresStore`] is the production backend. [`MemoryStore`] implements the
//! same traits for development runs without `DATABASE_URL` and for tests.

use crate::domain::account::{Account, BiometricEnrollment, Role, Session, WalletAddress};
use crate::domain::credential::{Credential, Notarization, SignatureRecord, WorkflowError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub mod documents;
pub mod memory;
pub mod postgres;

pub use documents::{DocumentError, DocumentStore, LocalDigest, StoredDocument};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fails with [`StoreError::Conflict`] when the email or wallet is taken.
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;
    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;
    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;
    async fn account_by_wallet(&self, wallet: &WalletAddress) -> Result<Option<Account>, StoreError>;
    async fn accounts_by_role(&self, role: Role) -> Result<Vec<Account>, StoreError>;
    async fn set_biometric(&self, id: Uuid, enrollment: &BiometricEnrollment) -> Result<(), StoreError>;

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError>;
    async fn session(&self, token_hash: &[u8; 32]) -> Result<Option<Session>, StoreError>;
    async fn delete_session(&self, token_hash: &[u8; 32]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts the credential with its signers and fields atomically.
    async fn insert_credential(&self, credential: &Credential) -> Result<(), StoreError>;
    async fn credential(&self, credential_id: &str) -> Result<Option<Credential>, StoreError>;
    /// Looks a credential up by its `0x`-prefixed lower-case hash.
    async fn credential_by_hash(&self, credential_hash: &str) -> Result<Option<Credential>, StoreError>;
    /// Credentials where `wallet` is issuer, student or signer, newest first.
    async fn credentials_for(&self, wallet: &WalletAddress) -> Result<Vec<Credential>, StoreError>;
    /// Applies a signature under a per-credential lock and returns the updated credential.
    async fn apply_signature(
        &self,
        credential_id: &str,
        signer: &WalletAddress,
        record: &SignatureRecord,
    ) -> Result<Credential, StoreError>;
    async fn update_notarization(&self, credential_id: &str, notarization: &Notarization) -> Result<(), StoreError>;
    /// Credentials whose notarization is pending or submitted and was last touched before `before`.
    async fn unsettled_notarizations(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Credential>, StoreError>;
}

#[async_trait]
pub trait Store: AccountStore + CredentialStore {
    /// Cheap liveness check used by `/health`.
    async fn ping(&self) -> Result<(), StoreError>;
}
