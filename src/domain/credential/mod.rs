//! Credential aggregate: the issued document, its signers and signature fields.

use crate::domain::account::{BiometricKind, WalletAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use utoipa::ToSchema;

pub mod workflow;

pub use workflow::{
    active_field, apply_signature, authorize, derive_status, eligible_signers, plan_fields, plan_signers,
    progress, FieldSpec, Progress, SignatureRecord, SignerSpec, WorkflowError,
};

pub const MAX_CREDENTIAL_ID_LEN: usize = 128;

/// How many parties must sign, and in what order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum SigningMode {
    /// The issuing institution is the only signer.
    #[serde(rename = "self")]
    SelfSign,
    /// Signers act one at a time in ascending `order`.
    #[serde(rename = "sequential")]
    Sequential,
    /// Any listed signer may act at any time.
    #[serde(rename = "parallel")]
    Parallel,
}

impl SigningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningMode::SelfSign => "self",
            SigningMode::Sequential => "sequential",
            SigningMode::Parallel => "parallel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "self" => Some(SigningMode::SelfSign),
            "sequential" => Some(SigningMode::Sequential),
            "parallel" => Some(SigningMode::Parallel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Pending,
    PartiallySigned,
    Completed,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Pending => "pending",
            CredentialStatus::PartiallySigned => "partially_signed",
            CredentialStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CredentialStatus::Pending),
            "partially_signed" => Some(CredentialStatus::PartiallySigned),
            "completed" => Some(CredentialStatus::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Signer {
    #[schema(value_type = String)]
    pub public_key: WalletAddress,
    /// 1-based position; only meaningful for sequential signing.
    pub order: u32,
    pub signed: bool,
    pub signed_at: Option<DateTime<Utc>>,
    /// Biometric method that gated the signature.
    pub verification: Option<BiometricKind>,
    pub confidence: Option<f64>,
    /// `personal_sign` signature over [`Credential::signing_message`], proving wallet ownership.
    pub wallet_signature: Option<String>,
}

/// A rectangle in page-relative coordinates (0..=1 on both axes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FieldRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl FieldRect {
    pub fn validate(&self) -> Result<(), String> {
        let FieldRect { x, y, width, height } = *self;
        if ![x, y, width, height].iter().all(|v| v.is_finite()) {
            return Err("coordinates must be finite numbers".to_string());
        }
        if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
            return Err("x and y must lie within 0..=1".to_string());
        }
        if width <= 0.0 || height <= 0.0 || width > 1.0 || height > 1.0 {
            return Err("width and height must lie within (0, 1]".to_string());
        }
        // Small tolerance for ratios computed from pixel sizes in the browser.
        const EPS: f64 = 1e-9;
        if x + width > 1.0 + EPS || y + height > 1.0 + EPS {
            return Err("rectangle extends beyond the page".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SignatureField {
    #[schema(value_type = String)]
    pub signer_public_key: WalletAddress,
    #[serde(flatten)]
    pub rect: FieldRect,
    /// 1-based page number.
    pub page: u32,
    pub color: String,
    pub signed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotarizationState {
    /// Not yet accepted by the chain (never sent, or the last attempt failed).
    Pending,
    /// Transaction sent, receipt not yet observed.
    Submitted,
    Confirmed,
    /// Gave up after the configured number of attempts, or the transaction reverted.
    Failed,
}

impl NotarizationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotarizationState::Pending => "pending",
            NotarizationState::Submitted => "submitted",
            NotarizationState::Confirmed => "confirmed",
            NotarizationState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotarizationState::Pending),
            "submitted" => Some(NotarizationState::Submitted),
            "confirmed" => Some(NotarizationState::Confirmed),
            "failed" => Some(NotarizationState::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Notarization {
    pub state: NotarizationState,
    pub tx_hash: Option<String>,
    pub block_number: Option<u64>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Notarization {
    pub fn pending(at: DateTime<Utc>) -> Self {
        Self {
            state: NotarizationState::Pending,
            tx_hash: None,
            block_number: None,
            attempts: 0,
            last_error: None,
            updated_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Credential {
    pub credential_id: String,
    pub title: String,
    pub purpose: String,
    pub document_path: String,
    /// Hex SHA-256 of the uploaded document, when it was uploaded here.
    pub document_digest: Option<String>,
    #[schema(value_type = String)]
    pub issuer_wallet: WalletAddress,
    #[schema(value_type = String)]
    pub student_wallet: WalletAddress,
    pub signing_mode: SigningMode,
    pub signers: Vec<Signer>,
    pub signature_fields: Vec<SignatureField>,
    pub status: CredentialStatus,
    /// `0x`-prefixed SHA-256 over the canonical issuance record.
    pub credential_hash: String,
    pub notarization: Notarization,
    pub issued_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// The immutable part of the record that the on-chain hash commits to.
    /// Signing progress is deliberately excluded.
    pub fn hash_material(&self) -> JsonValue {
        let signers: Vec<JsonValue> = self
            .signers
            .iter()
            .map(|s| json!({ "public_key": s.public_key.as_str(), "order": s.order }))
            .collect();
        json!({
            "credential_id": self.credential_id,
            "issuer": self.issuer_wallet.as_str(),
            "student": self.student_wallet.as_str(),
            "signing_mode": self.signing_mode.as_str(),
            "signers": signers,
            "document_path": self.document_path,
            "document_digest": self.document_digest,
            "issued_at": self.issued_at.timestamp_millis(),
        })
    }

    /// The text `wallet` must sign with its key before its signature is recorded.
    pub fn signing_message(&self, wallet: &WalletAddress) -> String {
        format!(
            "SignChain: wallet {} signs credential {} with hash {}",
            wallet, self.credential_id, self.credential_hash
        )
    }

    pub fn signer(&self, wallet: &WalletAddress) -> Option<&Signer> {
        self.signers.iter().find(|s| &s.public_key == wallet)
    }

    /// Issuer, student and every signer may view a credential.
    pub fn is_party(&self, wallet: &WalletAddress) -> bool {
        &self.issuer_wallet == wallet || &self.student_wallet == wallet || self.signer(wallet).is_some()
    }
}

/// Validates a client-supplied credential identifier.
pub fn validate_credential_id(id: &str) -> Result<(), String> {
    if id.is_empty() || id.len() > MAX_CREDENTIAL_ID_LEN {
        return Err(format!("credential_id must be 1..={} characters", MAX_CREDENTIAL_ID_LEN));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-')) {
        return Err("credential_id may only contain letters, digits, '.', '_', ':' and '-'".to_string());
    }
    Ok(())
}
