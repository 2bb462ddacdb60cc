//! Accounts, sessions and biometric enrolment.

use crate::app::error::AppError;
use crate::crypto::password::{dummy_hash, hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::crypto::token::{new_session_token, token_digest};
use crate::crypto::TemplateSealer;
use crate::domain::account::{
    normalize_email, Account, AccountView, BiometricEnrollment, BiometricKind, Role, Session, WalletAddress,
};
use crate::domain::biometric::{fingerprint_digest, match_face, validate_embedding, verify_fingerprint, BiometricProof};
use crate::infra::face::FaceEmbedder;
use crate::storage::Store;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub age: Option<i32>,
    pub role: Role,
    #[schema(example = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")]
    pub wallet_address: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResponse {
    /// Bearer token for the `Authorization` header.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub account: AccountView,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BiometricStatus {
    pub biometric_setup: bool,
    pub biometric_type: Option<BiometricKind>,
}

impl From<&BiometricEnrollment> for BiometricStatus {
    fn from(e: &BiometricEnrollment) -> Self {
        Self {
            biometric_setup: e.kind().is_some(),
            biometric_type: e.kind(),
        }
    }
}

/// Outcome of a successful biometric check.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BiometricCheck {
    pub kind: BiometricKind,
    /// Face matches only.
    pub confidence: Option<f64>,
    pub distance: Option<f64>,
}

pub struct AccountService {
    store: Arc<dyn Store>,
    face: Arc<dyn FaceEmbedder>,
    sealer: TemplateSealer,
    face_threshold: f64,
    session_ttl: Duration,
}

impl AccountService {
    pub fn new(
        store: Arc<dyn Store>,
        face: Arc<dyn FaceEmbedder>,
        sealer: TemplateSealer,
        face_threshold: f64,
        session_ttl: Duration,
    ) -> Self {
        Self {
            store,
            face,
            sealer,
            face_threshold,
            session_ttl,
        }
    }

    pub async fn signup(&self, req: SignupRequest) -> Result<AccountView, AppError> {
        let name = req.name.trim().to_string();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(AppError::Validation(format!(
                "name must be 1..={} characters",
                MAX_NAME_LEN
            )));
        }
        let email = normalize_email(&req.email).map_err(AppError::Validation)?;
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }
        if let Some(age) = req.age {
            if !(1..=150).contains(&age) {
                return Err(AppError::Validation("age must be between 1 and 150".to_string()));
            }
        }
        if req.role == Role::Admin {
            return Err(AppError::Forbidden("the admin role cannot be self-assigned".to_string()));
        }
        let wallet_address = WalletAddress::parse(&req.wallet_address).map_err(AppError::Validation)?;
        let phone = req.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());

        let password = req.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| AppError::Internal(format!("password hashing task: {}", e)))?
            .map_err(AppError::Internal)?;

        let account = Account {
            id: Uuid::new_v4(),
            name,
            email,
            phone,
            age: req.age,
            role: req.role,
            wallet_address,
            password_hash,
            biometric: BiometricEnrollment::None,
            created_at: Utc::now(),
        };
        self.store.insert_account(&account).await?;

        tracing::info!(account_id = %account.id, role = account.role.as_str(), "account created");
        Ok(AccountView::from(&account))
    }

    pub async fn login(&self, req: LoginRequest) -> Result<LoginResponse, AppError> {
        let invalid = || AppError::Unauthorized("invalid email or password".to_string());

        let email = normalize_email(&req.email).map_err(|_| invalid())?;
        let found = self.store.account_by_email(&email).await?;

        // Unknown emails still pay for one Argon2 verification.
        let stored = match &found {
            Some(account) => account.password_hash.clone(),
            None => dummy_hash().to_string(),
        };
        let password = req.password;
        let ok = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| AppError::Internal(format!("password verification task: {}", e)))?;
        let account = match found {
            Some(account) if ok => account,
            Some(account) => {
                tracing::info!(account_id = %account.id, "login rejected");
                return Err(invalid());
            }
            None => {
                tracing::info!("login rejected for unknown email");
                return Err(invalid());
            }
        };

        let (token, token_hash) = new_session_token();
        let ttl = chrono::Duration::from_std(self.session_ttl)
            .map_err(|e| AppError::Internal(format!("session ttl: {}", e)))?;
        let session = Session {
            token_hash,
            account_id: account.id,
            expires_at: Utc::now() + ttl,
        };
        self.store.insert_session(&session).await?;

        tracing::info!(account_id = %account.id, "login succeeded");
        Ok(LoginResponse {
            token,
            expires_at: session.expires_at,
            account: AccountView::from(&account),
        })
    }

    pub async fn logout(&self, token: &str) -> Result<(), AppError> {
        self.store.delete_session(&token_digest(token)).await?;
        Ok(())
    }

    /// Resolves a bearer token to its account. Expired sessions are removed.
    pub async fn authenticate(&self, token: &str) -> Result<Account, AppError> {
        let digest = token_digest(token);
        let session = self
            .store
            .session(&digest)
            .await?
            .ok_or_else(AppError::unauthorized)?;
        if session.expires_at <= Utc::now() {
            self.store.delete_session(&digest).await?;
            return Err(AppError::Unauthorized("session expired".to_string()));
        }
        self.store
            .account_by_id(session.account_id)
            .await?
            .ok_or_else(AppError::unauthorized)
    }

    pub async fn wallet_of(&self, email: &str) -> Result<WalletAddress, AppError> {
        let email = normalize_email(email).map_err(AppError::Validation)?;
        let account = self
            .store
            .account_by_email(&email)
            .await?
            .ok_or_else(|| AppError::NotFound("account".to_string()))?;
        Ok(account.wallet_address)
    }

    pub async fn list_students(&self, caller: &Account) -> Result<Vec<AccountView>, AppError> {
        if !caller.role.can_issue() {
            return Err(AppError::Forbidden("only institutions can list students".to_string()));
        }
        let students = self.store.accounts_by_role(Role::Student).await?;
        Ok(students.iter().map(AccountView::from).collect())
    }

    /// Enrolment status of `email`. Visible to the account itself and to institutions.
    pub async fn biometric_status(&self, caller: &Account, email: &str) -> Result<BiometricStatus, AppError> {
        let email = normalize_email(email).map_err(AppError::Validation)?;
        if caller.email != email && !caller.role.can_issue() {
            return Err(AppError::Forbidden(
                "cannot view another account's biometric status".to_string(),
            ));
        }
        let account = self
            .store
            .account_by_email(&email)
            .await?
            .ok_or_else(|| AppError::NotFound("account".to_string()))?;
        Ok(BiometricStatus::from(&account.biometric))
    }

    pub async fn enroll_face(&self, caller: &Account, image: &str) -> Result<BiometricStatus, AppError> {
        let embedding = self.face.embed(image).await?;
        validate_embedding(&embedding)?;
        let plain = serde_json::to_vec(&embedding)
            .map_err(|e| AppError::Internal(format!("encode embedding: {}", e)))?;
        let enrollment = BiometricEnrollment::Face {
            sealed_template: self.sealer.seal(&plain)?,
            enrolled_at: Utc::now(),
        };
        self.store.set_biometric(caller.id, &enrollment).await?;
        tracing::info!(account_id = %caller.id, dims = embedding.len(), "face enrolled");
        Ok(BiometricStatus::from(&enrollment))
    }

    pub async fn enroll_fingerprint(&self, caller: &Account, credential_id: &str) -> Result<BiometricStatus, AppError> {
        if credential_id.trim().is_empty() {
            return Err(AppError::Validation("credential_id is required".to_string()));
        }
        let enrollment = BiometricEnrollment::Fingerprint {
            digest: fingerprint_digest(credential_id),
            enrolled_at: Utc::now(),
        };
        self.store.set_biometric(caller.id, &enrollment).await?;
        tracing::info!(account_id = %caller.id, "fingerprint enrolled");
        Ok(BiometricStatus::from(&enrollment))
    }

    /// Checks `proof` against the account's enrolment.
    pub async fn verify_biometric(&self, account: &Account, proof: &BiometricProof) -> Result<BiometricCheck, AppError> {
        match (&account.biometric, proof) {
            (BiometricEnrollment::None, _) => Err(AppError::BiometricNotEnrolled),
            (BiometricEnrollment::Face { sealed_template, .. }, BiometricProof::Face { image }) => {
                let plain = self.sealer.open(sealed_template)?;
                let enrolled: Vec<f64> = serde_json::from_slice(&plain)
                    .map_err(|e| AppError::Internal(format!("decode face template: {}", e)))?;
                let captured = self.face.embed(image).await?;
                let m = match_face(&enrolled, &captured, self.face_threshold)?;
                tracing::info!(
                    account_id = %account.id,
                    matched = m.matched,
                    confidence = m.confidence,
                    "face verification"
                );
                if !m.matched {
                    return Err(AppError::BiometricMismatch {
                        confidence: Some(m.confidence),
                    });
                }
                Ok(BiometricCheck {
                    kind: BiometricKind::Face,
                    confidence: Some(m.confidence),
                    distance: Some(m.distance),
                })
            }
            (BiometricEnrollment::Fingerprint { digest, .. }, BiometricProof::Fingerprint { credential_id }) => {
                if !verify_fingerprint(digest, credential_id) {
                    tracing::info!(account_id = %account.id, "fingerprint verification failed");
                    return Err(AppError::BiometricMismatch { confidence: None });
                }
                Ok(BiometricCheck {
                    kind: BiometricKind::Fingerprint,
                    confidence: None,
                    distance: None,
                })
            }
            (enrolled, _) => Err(AppError::Validation(format!(
                "this account is enrolled with {}; present that kind of proof",
                enrolled.kind().map(|k| k.as_str()).unwrap_or("nothing")
            ))),
        }
    }
}
