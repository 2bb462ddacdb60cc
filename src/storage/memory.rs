//! In-process store used when no database is configured, and by tests.

use super::{AccountStore, CredentialStore, Store, StoreError};
use crate::domain::account::{Account, BiometricEnrollment, Role, Session, WalletAddress};
use crate::domain::credential::{self, Credential, NotarizationState, Notarization, SignatureRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    accounts: HashMap<Uuid, Account>,
    sessions: HashMap<[u8; 32], Session>,
    credentials: BTreeMap<String, Credential>,
}

/// A single lock guards all maps, so every mutation is serialized.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.accounts.values().any(|a| a.email == account.email) {
            return Err(StoreError::Conflict(format!("account with email {}", account.email)));
        }
        if state
            .accounts
            .values()
            .any(|a| a.wallet_address == account.wallet_address)
        {
            return Err(StoreError::Conflict(format!(
                "account with wallet {}",
                account.wallet_address
            )));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let state = self.state.read().await;
        Ok(state.accounts.values().find(|a| a.email == email).cloned())
    }

    async fn account_by_wallet(&self, wallet: &WalletAddress) -> Result<Option<Account>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .find(|a| &a.wallet_address == wallet)
            .cloned())
    }

    async fn accounts_by_role(&self, role: Role) -> Result<Vec<Account>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<Account> = state.accounts.values().filter(|a| a.role == role).cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.email.cmp(&b.email)));
        Ok(out)
    }

    async fn set_biometric(&self, id: Uuid, enrollment: &BiometricEnrollment) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))?;
        account.biometric = enrollment.clone();
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.sessions.insert(session.token_hash, session.clone());
        Ok(())
    }

    async fn session(&self, token_hash: &[u8; 32]) -> Result<Option<Session>, StoreError> {
        Ok(self.state.read().await.sessions.get(token_hash).cloned())
    }

    async fn delete_session(&self, token_hash: &[u8; 32]) -> Result<(), StoreError> {
        self.state.write().await.sessions.remove(token_hash);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert_credential(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.credentials.contains_key(&credential.credential_id) {
            return Err(StoreError::Conflict(format!("credential {}", credential.credential_id)));
        }
        state
            .credentials
            .insert(credential.credential_id.clone(), credential.clone());
        Ok(())
    }

    async fn credential(&self, credential_id: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.state.read().await.credentials.get(credential_id).cloned())
    }

    async fn credential_by_hash(&self, credential_hash: &str) -> Result<Option<Credential>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .credentials
            .values()
            .find(|c| c.credential_hash == credential_hash)
            .cloned())
    }

    async fn credentials_for(&self, wallet: &WalletAddress) -> Result<Vec<Credential>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<Credential> = state
            .credentials
            .values()
            .filter(|c| c.is_party(wallet))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(out)
    }

    async fn apply_signature(
        &self,
        credential_id: &str,
        signer: &WalletAddress,
        record: &SignatureRecord,
    ) -> Result<Credential, StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .credentials
            .get_mut(credential_id)
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", credential_id)))?;
        // Work on a copy so a rejected signature leaves the stored record untouched.
        let mut updated = stored.clone();
        credential::apply_signature(&mut updated, signer, record)?;
        *stored = updated.clone();
        Ok(updated)
    }

    async fn update_notarization(&self, credential_id: &str, notarization: &Notarization) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .credentials
            .get_mut(credential_id)
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", credential_id)))?;
        stored.notarization = notarization.clone();
        Ok(())
    }

    async fn unsettled_notarizations(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Credential>, StoreError> {
        let state = self.state.read().await;
        let mut out: Vec<Credential> = state
            .credentials
            .values()
            .filter(|c| {
                matches!(
                    c.notarization.state,
                    NotarizationState::Pending | NotarizationState::Submitted
                ) && c.notarization.updated_at < before
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.notarization.updated_at.cmp(&b.notarization.updated_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
