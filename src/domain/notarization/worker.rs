//! Background retry loop for credentials whose notarization has not settled.
//!
//! The worker wakes every `retry_interval` (or immediately on [`NotarizationWorker::trigger`]),
//! picks up `pending` and `submitted` credentials and advances each one step.
//! All notarization writes, including the inline attempt at issuance, go
//! through [`NotarizationWorker::notarize`], which holds a lock for that one
//! credential only. Slow ledger calls never block other credentials.

use super::{advance, Notary};
use crate::domain::credential::{Credential, Notarization, NotarizationState};
use crate::storage::{Store, StoreError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, OwnedMutexGuard};
use tokio::time::{interval, MissedTickBehavior};

/// Credentials handled per pass.
const BATCH_SIZE: i64 = 50;

/// One async mutex per credential id, created on demand and dropped when unused.
#[derive(Default)]
struct CredentialLocks {
    held: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

struct CredentialGuard<'a> {
    locks: &'a CredentialLocks,
    credential_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl CredentialLocks {
    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn lock(&self, credential_id: &str) -> CredentialGuard<'_> {
        let entry = self
            .map()
            .entry(credential_id.to_string())
            .or_default()
            .clone();
        CredentialGuard {
            locks: self,
            credential_id: credential_id.to_string(),
            _guard: entry.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.map().len()
    }
}

impl Drop for CredentialGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        // The map and this guard hold the only references: nobody is waiting.
        if map
            .get(&self.credential_id)
            .is_some_and(|m| Arc::strong_count(m) <= 2)
        {
            map.remove(&self.credential_id);
        }
    }
}

pub struct NotarizationWorker {
    store: Arc<dyn Store>,
    notary: Arc<dyn Notary>,
    retry_interval: Duration,
    max_attempts: u32,
    /// Serializes read-advance-write per credential.
    locks: CredentialLocks,
    shutdown: Notify,
    trigger: Notify,
}

impl NotarizationWorker {
    pub fn new(store: Arc<dyn Store>, notary: Arc<dyn Notary>, retry_interval: Duration, max_attempts: u32) -> Self {
        Self {
            store,
            notary,
            retry_interval,
            max_attempts: max_attempts.max(1),
            locks: CredentialLocks::default(),
            shutdown: Notify::new(),
            trigger: Notify::new(),
        }
    }

    pub fn notary(&self) -> &Arc<dyn Notary> {
        &self.notary
    }

    /// Advances one credential and persists the result.
    /// The record is re-read under the lock so a concurrent pass cannot submit twice.
    pub async fn notarize(&self, credential_id: &str) -> Result<Notarization, StoreError> {
        let _guard = self.locks.lock(credential_id).await;
        let credential = self
            .store
            .credential(credential_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", credential_id)))?;
        self.advance_locked(&credential).await
    }

    /// Re-opens a `failed` record for another round of attempts, then advances it.
    pub async fn retry_failed(&self, credential_id: &str) -> Result<Notarization, StoreError> {
        let _guard = self.locks.lock(credential_id).await;
        let mut credential = self
            .store
            .credential(credential_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", credential_id)))?;
        if credential.notarization.state == NotarizationState::Failed {
            credential.notarization.state = NotarizationState::Pending;
            credential.notarization.attempts = 0;
            credential.notarization.tx_hash = None;
        }
        self.advance_locked(&credential).await
    }

    async fn advance_locked(&self, credential: &Credential) -> Result<Notarization, StoreError> {
        let before = credential.notarization.state;
        let next = advance(self.notary.as_ref(), credential, self.max_attempts, Utc::now()).await;
        if next != credential.notarization {
            self.store
                .update_notarization(&credential.credential_id, &next)
                .await?;
        }
        if next.state != before {
            tracing::info!(
                credential_id = %credential.credential_id,
                notary = self.notary.name(),
                from = before.as_str(),
                to = next.state.as_str(),
                attempts = next.attempts,
                tx_hash = next.tx_hash.as_deref().unwrap_or(""),
                "notarization advanced"
            );
        }
        if let Some(err) = &next.last_error {
            if next.attempts != credential.notarization.attempts {
                tracing::warn!(
                    credential_id = %credential.credential_id,
                    attempts = next.attempts,
                    error = %err,
                    "notarization attempt failed"
                );
            }
        }
        Ok(next)
    }

    /// One pass over unsettled credentials. With `due_only`, records touched
    /// within the last `retry_interval` are skipped. Returns how many were advanced.
    pub async fn run_once(&self, due_only: bool) -> Result<usize, StoreError> {
        let now = Utc::now();
        let before = if due_only {
            chrono::Duration::from_std(self.retry_interval)
                .map(|d| now - d)
                .unwrap_or(now)
        } else {
            now + chrono::Duration::seconds(1)
        };
        let due = self.store.unsettled_notarizations(before, BATCH_SIZE).await?;
        let mut advanced = 0;
        for credential in due {
            match self.notarize(&credential.credential_id).await {
                Ok(_) => advanced += 1,
                Err(e) => tracing::error!(
                    credential_id = %credential.credential_id,
                    error = %e,
                    "failed to persist notarization progress"
                ),
            }
        }
        Ok(advanced)
    }

    /// Spawns the background loop. It runs until [`NotarizationWorker::shutdown`] is called.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timer = interval(self.retry_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                notary = self.notary.name(),
                interval_secs = self.retry_interval.as_secs(),
                max_attempts = self.max_attempts,
                "notarization worker started"
            );

            loop {
                let due_only = tokio::select! {
                    _ = timer.tick() => true,
                    _ = self.trigger.notified() => false,
                    _ = self.shutdown.notified() => {
                        tracing::info!("notarization worker shutting down");
                        break;
                    }
                };
                if let Err(e) = self.run_once(due_only).await {
                    tracing::error!(error = %e, "notarization pass failed");
                }
            }
        })
    }

    /// Requests an immediate pass over every unsettled credential.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
