//! Credential issuance, signing, verification and notarization.

use crate::app::account_service::{AccountService, BiometricCheck};
use crate::app::error::AppError;
use crate::crypto::hashing::{h256_to_hex, hash_credential, parse_h256_hex};
use crate::crypto::wallet::{normalize_signature, recover_signer};
use crate::domain::account::{Account, Role, WalletAddress};
use crate::domain::biometric::BiometricProof;
use crate::domain::credential::{
    self, validate_credential_id, Credential, CredentialStatus, FieldSpec, Notarization, NotarizationState,
    Progress, SignatureField, SignatureRecord, Signer, SignerSpec, SigningMode,
};
use crate::domain::notarization::{ChainStatus, NotarizationWorker};
use crate::storage::{DocumentStore, LocalDigest, Store, StoredDocument};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

const DEFAULT_TITLE: &str = "Credential";

#[derive(Debug, Deserialize, ToSchema)]
pub struct IssueRequest {
    #[schema(example = "BSC-2024-0042")]
    pub credential_id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub purpose: Option<String>,
    /// `file_path` returned by the upload endpoint, or an external URL.
    pub document_path: String,
    /// Hex SHA-256 of the document. Computed here for uploaded files; a
    /// supplied value must then match it.
    #[serde(default)]
    pub document_digest: Option<String>,
    pub student_wallet: String,
    pub signing_mode: SigningMode,
    #[serde(default)]
    pub signers: Vec<SignerSpec>,
    #[serde(default)]
    pub signature_fields: Vec<FieldSpec>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialView {
    #[serde(flatten)]
    pub credential: Credential,
    pub progress: Progress,
    pub explorer_url: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialStatusView {
    pub credential_id: String,
    pub signing_mode: SigningMode,
    pub status: CredentialStatus,
    /// Ordered by `order`.
    pub signers: Vec<Signer>,
    pub progress: Progress,
    /// Whether the caller may sign right now.
    pub your_turn: bool,
    /// The caller's next unsigned box, if any.
    pub active_field: Option<SignatureField>,
}

/// Text the caller's wallet must `personal_sign` before signing.
#[derive(Debug, Serialize, ToSchema)]
pub struct SigningMessage {
    pub credential_id: String,
    #[schema(value_type = String)]
    pub wallet_address: WalletAddress,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignResponse {
    pub credential: CredentialView,
    pub verification: BiometricCheck,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerificationReport {
    pub credential_id: String,
    /// The stored hash matches the recomputed one.
    pub hash_valid: bool,
    pub credential_hash: String,
    pub computed_hash: String,
    /// Present when the document was uploaded to this server. A missing file is `false`.
    pub document_intact: Option<bool>,
    pub status: CredentialStatus,
    pub notarization: Notarization,
    /// Live ledger status of the recorded transaction.
    pub chain: Option<ChainStatus>,
    pub chain_error: Option<String>,
    pub explorer_url: Option<String>,
}

pub struct CredentialService {
    store: Arc<dyn Store>,
    accounts: Arc<AccountService>,
    documents: DocumentStore,
    notarizer: Arc<NotarizationWorker>,
    explorer_tx_url: Option<String>,
}

impl CredentialService {
    pub fn new(
        store: Arc<dyn Store>,
        accounts: Arc<AccountService>,
        documents: DocumentStore,
        notarizer: Arc<NotarizationWorker>,
        explorer_tx_url: Option<String>,
    ) -> Self {
        Self {
            store,
            accounts,
            documents,
            notarizer,
            explorer_tx_url,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.documents.max_bytes()
    }

    fn explorer_url(&self, n: &Notarization) -> Option<String> {
        match (&self.explorer_tx_url, &n.tx_hash) {
            (Some(base), Some(tx)) => Some(format!("{}{}", base, tx)),
            _ => None,
        }
    }

    fn view(&self, credential: Credential) -> CredentialView {
        CredentialView {
            progress: credential::progress(&credential),
            explorer_url: self.explorer_url(&credential.notarization),
            credential,
        }
    }

    async fn load(&self, credential_id: &str) -> Result<Credential, AppError> {
        self.store
            .credential(credential_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("credential {}", credential_id)))
    }

    async fn load_visible(&self, credential_id: &str, viewer: &Account) -> Result<Credential, AppError> {
        let c = self.load(credential_id).await?;
        if viewer.role != Role::Admin && !c.is_party(&viewer.wallet_address) {
            return Err(AppError::Forbidden("you are not a party to this credential".to_string()));
        }
        Ok(c)
    }

    pub async fn upload_document(
        &self,
        caller: &Account,
        bytes: &[u8],
        original_name: Option<&str>,
    ) -> Result<StoredDocument, AppError> {
        if !caller.role.can_issue() {
            return Err(AppError::Forbidden("only institutions can upload certificates".to_string()));
        }
        Ok(self.documents.save(bytes, original_name).await?)
    }

    pub async fn issue(&self, issuer: &Account, req: IssueRequest) -> Result<CredentialView, AppError> {
        if !issuer.role.can_issue() {
            return Err(AppError::Forbidden("only institutions can issue credentials".to_string()));
        }
        let credential_id = req.credential_id.trim().to_string();
        validate_credential_id(&credential_id).map_err(AppError::Validation)?;

        let document_path = req.document_path.trim().to_string();
        if document_path.is_empty() {
            return Err(AppError::Validation("document_path is required".to_string()));
        }
        let supplied = req.document_digest.as_deref().map(normalize_digest).transpose()?;
        let document_digest = match self.documents.digest_of(&document_path).await? {
            LocalDigest::External => supplied,
            LocalDigest::Missing => {
                return Err(AppError::Validation(format!(
                    "{} is not an uploaded document",
                    document_path
                )))
            }
            LocalDigest::Present(actual) => {
                if supplied.as_ref().is_some_and(|d| d != &actual) {
                    return Err(AppError::Validation(
                        "document_digest does not match the uploaded document".to_string(),
                    ));
                }
                Some(actual)
            }
        };

        let student_wallet = WalletAddress::parse(&req.student_wallet).map_err(AppError::Validation)?;
        match self.store.account_by_wallet(&student_wallet).await? {
            Some(a) if a.role == Role::Student => {}
            _ => {
                return Err(AppError::Validation(format!(
                    "{} is not a registered student",
                    student_wallet
                )))
            }
        }

        let signers = credential::plan_signers(req.signing_mode, &issuer.wallet_address, &req.signers)?;
        for s in &signers {
            if self.store.account_by_wallet(&s.public_key).await?.is_none() {
                return Err(AppError::Validation(format!(
                    "signer {} is not a registered account",
                    s.public_key
                )));
            }
        }
        let signature_fields = credential::plan_fields(&signers, &req.signature_fields)?;

        let now = Utc::now();
        let mut c = Credential {
            credential_id,
            title: req
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            purpose: req.purpose.map(|p| p.trim().to_string()).unwrap_or_default(),
            document_path,
            document_digest,
            issuer_wallet: issuer.wallet_address.clone(),
            student_wallet,
            signing_mode: req.signing_mode,
            signers,
            signature_fields,
            status: CredentialStatus::Pending,
            credential_hash: String::new(),
            notarization: Notarization::pending(now),
            issued_at: now,
            completed_at: None,
        };
        c.credential_hash = h256_to_hex(&hash_credential(&c.hash_material()));

        self.store.insert_credential(&c).await?;
        tracing::info!(
            credential_id = %c.credential_id,
            issuer = %c.issuer_wallet,
            mode = c.signing_mode.as_str(),
            signers = c.signers.len(),
            credential_hash = %c.credential_hash,
            "credential issued"
        );

        // The credential is committed; a notary failure only delays notarization.
        match self.notarizer.notarize(&c.credential_id).await {
            Ok(n) => c.notarization = n,
            Err(e) => tracing::warn!(
                credential_id = %c.credential_id,
                error = %e,
                "inline notarization failed; left for the background worker"
            ),
        }
        Ok(self.view(c))
    }

    pub async fn list_for(&self, caller: &Account) -> Result<Vec<CredentialView>, AppError> {
        let credentials = self.store.credentials_for(&caller.wallet_address).await?;
        Ok(credentials.into_iter().map(|c| self.view(c)).collect())
    }

    pub async fn get(&self, credential_id: &str, viewer: &Account) -> Result<CredentialView, AppError> {
        let c = self.load_visible(credential_id, viewer).await?;
        Ok(self.view(c))
    }

    pub async fn status(&self, credential_id: &str, viewer: &Account) -> Result<CredentialStatusView, AppError> {
        let c = self.load_visible(credential_id, viewer).await?;
        let mut signers = c.signers.clone();
        signers.sort_by_key(|s| s.order);
        Ok(CredentialStatusView {
            your_turn: credential::authorize(&c, &viewer.wallet_address).is_ok(),
            active_field: credential::active_field(&c, &viewer.wallet_address).cloned(),
            progress: credential::progress(&c),
            credential_id: c.credential_id,
            signing_mode: c.signing_mode,
            status: c.status,
            signers,
        })
    }

    /// Biometric check for a signer of `credential_id`, without signing.
    pub async fn verify_face_for_credential(
        &self,
        caller: &Account,
        credential_id: &str,
        image: &str,
    ) -> Result<BiometricCheck, AppError> {
        let c = self.load(credential_id).await?;
        if c.signer(&caller.wallet_address).is_none() {
            return Err(AppError::NotASigner(caller.wallet_address.to_string()));
        }
        self.accounts
            .verify_biometric(
                caller,
                &BiometricProof::Face {
                    image: image.to_string(),
                },
            )
            .await
    }

    /// The message `caller` must sign with its wallet to sign `credential_id`.
    pub async fn signing_message(&self, credential_id: &str, caller: &Account) -> Result<SigningMessage, AppError> {
        let c = self.load(credential_id).await?;
        if c.signer(&caller.wallet_address).is_none() {
            return Err(AppError::NotASigner(caller.wallet_address.to_string()));
        }
        Ok(SigningMessage {
            message: c.signing_message(&caller.wallet_address),
            credential_id: c.credential_id,
            wallet_address: caller.wallet_address.clone(),
        })
    }

    pub async fn sign(
        &self,
        credential_id: &str,
        signer: &Account,
        proof: &BiometricProof,
        wallet_signature: &str,
    ) -> Result<SignResponse, AppError> {
        let current = self.load(credential_id).await?;
        // Reject out-of-turn signers before calling the face service.
        credential::authorize(&current, &signer.wallet_address)?;

        let wallet_signature =
            normalize_signature(wallet_signature).map_err(|e| AppError::Validation(e.to_string()))?;
        let message = current.signing_message(&signer.wallet_address);
        let recovered =
            recover_signer(&message, &wallet_signature).map_err(|e| AppError::Validation(e.to_string()))?;
        if recovered != signer.wallet_address {
            tracing::info!(
                credential_id = %credential_id,
                signer = %signer.wallet_address,
                recovered = %recovered,
                "wallet signature rejected"
            );
            return Err(AppError::WalletSignatureMismatch {
                recovered: recovered.to_string(),
            });
        }

        let check = self.accounts.verify_biometric(signer, proof).await?;

        let record = SignatureRecord {
            verification: check.kind,
            confidence: check.confidence,
            wallet_signature,
            at: Utc::now(),
        };
        let updated = self
            .store
            .apply_signature(credential_id, &signer.wallet_address, &record)
            .await?;

        tracing::info!(
            credential_id = %credential_id,
            signer = %signer.wallet_address,
            verification = check.kind.as_str(),
            status = updated.status.as_str(),
            "credential signed"
        );
        Ok(SignResponse {
            credential: self.view(updated),
            verification: check,
        })
    }

    /// Public verification: recomputes the hash and reports the ledger status.
    pub async fn verify(&self, credential_id: &str) -> Result<VerificationReport, AppError> {
        let c = self.load(credential_id).await?;
        self.report(c).await
    }

    /// Public verification starting from a credential hash instead of an id.
    pub async fn verify_hash(&self, credential_hash: &str) -> Result<VerificationReport, AppError> {
        let hash = parse_h256_hex(credential_hash)
            .map_err(|e| AppError::Validation(format!("credential hash: {}", e)))?;
        let c = self
            .store
            .credential_by_hash(&h256_to_hex(&hash))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("credential with hash {}", h256_to_hex(&hash))))?;
        self.report(c).await
    }

    async fn report(&self, c: Credential) -> Result<VerificationReport, AppError> {
        let computed_hash = h256_to_hex(&hash_credential(&c.hash_material()));

        let document_intact = match (&c.document_digest, self.documents.digest_of(&c.document_path).await?) {
            (_, LocalDigest::External) => None,
            (Some(expected), LocalDigest::Present(actual)) => Some(&actual == expected),
            // A local document that vanished, or a local record that lost its digest.
            (_, LocalDigest::Missing) | (None, LocalDigest::Present(_)) => Some(false),
        };
        if document_intact == Some(false) {
            tracing::warn!(
                credential_id = %c.credential_id,
                document_path = %c.document_path,
                "stored document does not match its credential"
            );
        }

        let (chain, chain_error) = match &c.notarization.tx_hash {
            Some(tx) => match self.notarizer.notary().status(tx).await {
                Ok(s) => (Some(s), None),
                Err(e) => (None, Some(e.to_string())),
            },
            None => (None, None),
        };

        Ok(VerificationReport {
            hash_valid: computed_hash == c.credential_hash,
            explorer_url: self.explorer_url(&c.notarization),
            credential_id: c.credential_id,
            credential_hash: c.credential_hash,
            computed_hash,
            document_intact,
            status: c.status,
            notarization: c.notarization,
            chain,
            chain_error,
        })
    }

    /// Immediate notarization attempt, re-opening a failed record.
    pub async fn renotarize(&self, credential_id: &str, caller: &Account) -> Result<Notarization, AppError> {
        let c = self.load(credential_id).await?;
        if caller.role != Role::Admin && c.issuer_wallet != caller.wallet_address {
            return Err(AppError::Forbidden(
                "only the issuer or an admin can retry notarization".to_string(),
            ));
        }
        let n = match c.notarization.state {
            NotarizationState::Confirmed => return Ok(c.notarization),
            NotarizationState::Failed => self.notarizer.retry_failed(credential_id).await?,
            NotarizationState::Pending | NotarizationState::Submitted => {
                self.notarizer.notarize(credential_id).await?
            }
        };
        Ok(n)
    }
}

fn normalize_digest(raw: &str) -> Result<String, AppError> {
    let s = raw.trim();
    let s = s.strip_prefix("0x").unwrap_or(s).to_ascii_lowercase();
    if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::Validation(
            "document_digest must be a 32-byte hex SHA-256".to_string(),
        ));
    }
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_are_normalized() {
        let d = format!("0x{}", "AB".repeat(32));
        assert_eq!(normalize_digest(&d).unwrap(), "ab".repeat(32));
        assert!(normalize_digest("abc").is_err());
    }
}
