//! Signer-turn resolution for self / sequential / parallel signing.
//!
//! This is the only place that decides who may sign a credential next. The
//! stores call [`apply_signature`] while holding their per-credential lock, so
//! the check and the state change happen atomically.

use super::{Credential, CredentialStatus, FieldRect, SignatureField, Signer, SigningMode};
use crate::domain::account::{BiometricKind, WalletAddress};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use utoipa::ToSchema;

pub const DEFAULT_FIELD_COLOR: &str = "blue";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("at least one signer is required for {0} signing")]
    NoSigners(&'static str),
    #[error("self signing allows only the issuing institution as signer")]
    SelfSignMismatch,
    #[error("signer {0} is listed more than once")]
    DuplicateSigner(String),
    #[error("signer order {0} is used more than once")]
    DuplicateOrder(u32),
    #[error("signer order must be 1 or greater")]
    InvalidOrder,
    #[error("signature field {index} belongs to {signer}, who is not a signer of this credential")]
    UnknownFieldSigner { index: usize, signer: String },
    #[error("signature field {index} is invalid: {reason}")]
    InvalidField { index: usize, reason: String },
    #[error("{0} is not a signer of this credential")]
    NotASigner(String),
    #[error("{0} has already signed this credential")]
    AlreadySigned(String),
    #[error("not your turn to sign; waiting for {expected}")]
    NotYourTurn { expected: String },
    #[error("credential is already completed")]
    AlreadyCompleted,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct SignerSpec {
    #[schema(value_type = String)]
    pub public_key: WalletAddress,
    #[serde(default)]
    pub order: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct FieldSpec {
    #[schema(value_type = String)]
    pub signer_public_key: WalletAddress,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub color: Option<String>,
}

/// What gets recorded on a signer when its signature is accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureRecord {
    pub verification: BiometricKind,
    pub confidence: Option<f64>,
    pub wallet_signature: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Progress {
    pub signed: usize,
    pub total: usize,
    /// Wallets that may sign right now.
    #[schema(value_type = Vec<String>)]
    pub next: Vec<WalletAddress>,
}

/// Resolves the requested signers into the stored signer list (sorted by order).
pub fn plan_signers(
    mode: SigningMode,
    issuer: &WalletAddress,
    requested: &[SignerSpec],
) -> Result<Vec<Signer>, WorkflowError> {
    let unsigned = |public_key: WalletAddress, order: u32| Signer {
        public_key,
        order,
        signed: false,
        signed_at: None,
        verification: None,
        confidence: None,
        wallet_signature: None,
    };

    if mode == SigningMode::SelfSign {
        return match requested {
            [] => Ok(vec![unsigned(issuer.clone(), 1)]),
            [only] if &only.public_key == issuer => Ok(vec![unsigned(issuer.clone(), 1)]),
            _ => Err(WorkflowError::SelfSignMismatch),
        };
    }

    if requested.is_empty() {
        return Err(WorkflowError::NoSigners(mode.as_str()));
    }

    // Signers without an explicit order go after the highest explicit one, in list order.
    let mut next_implicit = requested.iter().filter_map(|s| s.order).max().unwrap_or(0);
    let mut seen_keys = HashSet::new();
    let mut seen_orders = HashSet::new();
    let mut signers = Vec::with_capacity(requested.len());
    for spec in requested {
        let order = match spec.order {
            Some(order) => order,
            None => {
                next_implicit = next_implicit.saturating_add(1);
                next_implicit
            }
        };
        if order == 0 {
            return Err(WorkflowError::InvalidOrder);
        }
        if !seen_keys.insert(spec.public_key.clone()) {
            return Err(WorkflowError::DuplicateSigner(spec.public_key.to_string()));
        }
        if !seen_orders.insert(order) {
            return Err(WorkflowError::DuplicateOrder(order));
        }
        signers.push(unsigned(spec.public_key.clone(), order));
    }
    signers.sort_by_key(|s| s.order);
    Ok(signers)
}

/// Validates field placements against the resolved signer list.
pub fn plan_fields(signers: &[Signer], requested: &[FieldSpec]) -> Result<Vec<SignatureField>, WorkflowError> {
    requested
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            if !signers.iter().any(|s| s.public_key == spec.signer_public_key) {
                return Err(WorkflowError::UnknownFieldSigner {
                    index,
                    signer: spec.signer_public_key.to_string(),
                });
            }
            let rect = FieldRect {
                x: spec.x,
                y: spec.y,
                width: spec.width,
                height: spec.height,
            };
            rect.validate()
                .map_err(|reason| WorkflowError::InvalidField { index, reason })?;
            let page = spec.page.unwrap_or(1);
            if page == 0 {
                return Err(WorkflowError::InvalidField {
                    index,
                    reason: "page numbers start at 1".to_string(),
                });
            }
            let color = spec
                .color
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .unwrap_or(DEFAULT_FIELD_COLOR)
                .to_string();
            Ok(SignatureField {
                signer_public_key: spec.signer_public_key.clone(),
                rect,
                page,
                color,
                signed: false,
            })
        })
        .collect()
}

/// Signers who may act now.
pub fn eligible_signers(credential: &Credential) -> Vec<&Signer> {
    if credential.status == CredentialStatus::Completed {
        return Vec::new();
    }
    let mut unsigned = credential.signers.iter().filter(|s| !s.signed);
    match credential.signing_mode {
        SigningMode::SelfSign | SigningMode::Parallel => unsigned.collect(),
        SigningMode::Sequential => unsigned.min_by_key(|s| s.order).into_iter().collect(),
    }
}

/// Checks whether `wallet` may sign `credential` now.
pub fn authorize<'a>(credential: &'a Credential, wallet: &WalletAddress) -> Result<&'a Signer, WorkflowError> {
    let signer = credential
        .signer(wallet)
        .ok_or_else(|| WorkflowError::NotASigner(wallet.to_string()))?;
    if credential.status == CredentialStatus::Completed {
        return Err(WorkflowError::AlreadyCompleted);
    }
    if signer.signed {
        return Err(WorkflowError::AlreadySigned(wallet.to_string()));
    }
    if credential.signing_mode == SigningMode::Sequential {
        let next = eligible_signers(credential);
        if let Some(expected) = next.first() {
            if &expected.public_key != wallet {
                return Err(WorkflowError::NotYourTurn {
                    expected: expected.public_key.to_string(),
                });
            }
        }
    }
    Ok(signer)
}

pub fn derive_status(signers: &[Signer]) -> CredentialStatus {
    let signed = signers.iter().filter(|s| s.signed).count();
    if signed == 0 {
        CredentialStatus::Pending
    } else if signed == signers.len() {
        CredentialStatus::Completed
    } else {
        CredentialStatus::PartiallySigned
    }
}

/// Records `wallet`'s signature: flips the signer and all of its fields, then recomputes status.
pub fn apply_signature(
    credential: &mut Credential,
    wallet: &WalletAddress,
    record: &SignatureRecord,
) -> Result<(), WorkflowError> {
    authorize(credential, wallet)?;

    let at = record.at;
    for signer in credential.signers.iter_mut().filter(|s| &s.public_key == wallet) {
        signer.signed = true;
        signer.signed_at = Some(at);
        signer.verification = Some(record.verification);
        signer.confidence = record.confidence;
        signer.wallet_signature = Some(record.wallet_signature.clone());
    }
    for field in credential
        .signature_fields
        .iter_mut()
        .filter(|f| &f.signer_public_key == wallet)
    {
        field.signed = true;
    }

    credential.status = derive_status(&credential.signers);
    if credential.status == CredentialStatus::Completed {
        credential.completed_at = Some(at);
    }
    Ok(())
}

/// The first unsigned box belonging to `wallet`, if any.
pub fn active_field<'a>(credential: &'a Credential, wallet: &WalletAddress) -> Option<&'a SignatureField> {
    credential
        .signature_fields
        .iter()
        .find(|f| !f.signed && &f.signer_public_key == wallet)
}

pub fn progress(credential: &Credential) -> Progress {
    Progress {
        signed: credential.signers.iter().filter(|s| s.signed).count(),
        total: credential.signers.len(),
        next: eligible_signers(credential)
            .into_iter()
            .map(|s| s.public_key.clone())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credential::Notarization;

    fn wallet(n: u8) -> WalletAddress {
        WalletAddress::parse(&format!("0x{}", hex::encode([n; 20]))).unwrap()
    }

    fn spec(n: u8, order: Option<u32>) -> SignerSpec {
        SignerSpec { public_key: wallet(n), order }
    }

    fn field(n: u8) -> FieldSpec {
        FieldSpec {
            signer_public_key: wallet(n),
            x: 0.1,
            y: 0.7,
            width: 0.2,
            height: 0.1,
            page: None,
            color: None,
        }
    }

    fn record(verification: BiometricKind, at: DateTime<Utc>) -> SignatureRecord {
        SignatureRecord {
            verification,
            confidence: None,
            wallet_signature: format!("0x{}", "ab".repeat(65)),
            at,
        }
    }

    fn credential(mode: SigningMode, signers: Vec<Signer>, fields: Vec<SignatureField>) -> Credential {
        let now = Utc::now();
        Credential {
            credential_id: "CERT-1".to_string(),
            title: "Degree".to_string(),
            purpose: String::new(),
            document_path: "doc.pdf".to_string(),
            document_digest: None,
            issuer_wallet: wallet(1),
            student_wallet: wallet(9),
            signing_mode: mode,
            status: derive_status(&signers),
            signers,
            signature_fields: fields,
            credential_hash: String::new(),
            notarization: Notarization::pending(now),
            issued_at: now,
            completed_at: None,
        }
    }

    #[test]
    fn self_sign_defaults_to_issuer() {
        let signers = plan_signers(SigningMode::SelfSign, &wallet(1), &[]).unwrap();
        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].public_key, wallet(1));
        assert_eq!(signers[0].order, 1);

        assert!(plan_signers(SigningMode::SelfSign, &wallet(1), &[spec(1, None)]).is_ok());
        assert_eq!(
            plan_signers(SigningMode::SelfSign, &wallet(1), &[spec(2, None)]),
            Err(WorkflowError::SelfSignMismatch)
        );
    }

    #[test]
    fn multi_party_requires_distinct_signers_and_orders() {
        assert_eq!(
            plan_signers(SigningMode::Parallel, &wallet(1), &[]),
            Err(WorkflowError::NoSigners("parallel"))
        );
        assert!(matches!(
            plan_signers(SigningMode::Sequential, &wallet(1), &[spec(2, None), spec(2, None)]),
            Err(WorkflowError::DuplicateSigner(_))
        ));
        assert_eq!(
            plan_signers(SigningMode::Sequential, &wallet(1), &[spec(2, Some(2)), spec(3, Some(2))]),
            Err(WorkflowError::DuplicateOrder(2))
        );
        assert_eq!(
            plan_signers(SigningMode::Sequential, &wallet(1), &[spec(2, Some(0))]),
            Err(WorkflowError::InvalidOrder)
        );
    }

    #[test]
    fn explicit_orders_are_sorted() {
        let signers = plan_signers(
            SigningMode::Sequential,
            &wallet(1),
            &[spec(2, Some(3)), spec(3, Some(1)), spec(4, Some(2))],
        )
        .unwrap();
        let orders: Vec<u32> = signers.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2, 3]);
        assert_eq!(signers[0].public_key, wallet(3));
    }

    #[test]
    fn implicit_orders_follow_explicit_ones() {
        let signers = plan_signers(
            SigningMode::Sequential,
            &wallet(1),
            &[spec(2, None), spec(3, Some(1)), spec(4, None), spec(5, Some(4))],
        )
        .unwrap();
        let placed: Vec<(WalletAddress, u32)> = signers.iter().map(|s| (s.public_key.clone(), s.order)).collect();
        assert_eq!(
            placed,
            vec![(wallet(3), 1), (wallet(5), 4), (wallet(2), 5), (wallet(4), 6)]
        );

        let listed = plan_signers(SigningMode::Sequential, &wallet(1), &[spec(2, None), spec(3, None)]).unwrap();
        assert_eq!(listed.iter().map(|s| s.order).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn fields_must_reference_signers() {
        let signers = plan_signers(SigningMode::Parallel, &wallet(1), &[spec(2, None)]).unwrap();
        let fields = plan_fields(&signers, &[field(2)]).unwrap();
        assert_eq!(fields[0].color, DEFAULT_FIELD_COLOR);
        assert_eq!(fields[0].page, 1);

        assert!(matches!(
            plan_fields(&signers, &[field(3)]),
            Err(WorkflowError::UnknownFieldSigner { index: 0, .. })
        ));
        let mut bad = field(2);
        bad.width = f64::NAN;
        assert!(matches!(
            plan_fields(&signers, &[field(2), bad]),
            Err(WorkflowError::InvalidField { index: 1, .. })
        ));
    }

    #[test]
    fn sequential_enforces_turns() {
        let signers = plan_signers(SigningMode::Sequential, &wallet(1), &[spec(2, None), spec(3, None)]).unwrap();
        let fields = plan_fields(&signers, &[field(2), field(3)]).unwrap();
        let mut c = credential(SigningMode::Sequential, signers, fields);
        let now = Utc::now();

        assert_eq!(
            apply_signature(&mut c, &wallet(3), &record(BiometricKind::Face, now)),
            Err(WorkflowError::NotYourTurn { expected: wallet(2).to_string() })
        );
        let with_confidence = SignatureRecord {
            confidence: Some(0.95),
            ..record(BiometricKind::Face, now)
        };
        apply_signature(&mut c, &wallet(2), &with_confidence).unwrap();
        assert_eq!(c.signers[0].confidence, Some(0.95));
        assert_eq!(c.signers[0].wallet_signature, Some(with_confidence.wallet_signature.clone()));
        assert_eq!(c.status, CredentialStatus::PartiallySigned);
        assert!(c.signature_fields[0].signed);
        assert!(!c.signature_fields[1].signed);
        assert_eq!(progress(&c).next, vec![wallet(3)]);

        assert_eq!(
            apply_signature(&mut c, &wallet(2), &record(BiometricKind::Face, now)),
            Err(WorkflowError::AlreadySigned(wallet(2).to_string()))
        );
        apply_signature(&mut c, &wallet(3), &record(BiometricKind::Fingerprint, now)).unwrap();
        assert_eq!(c.status, CredentialStatus::Completed);
        assert_eq!(c.completed_at, Some(now));
        assert!(eligible_signers(&c).is_empty());
        assert_eq!(
            apply_signature(&mut c, &wallet(3), &record(BiometricKind::Face, now)),
            Err(WorkflowError::AlreadyCompleted)
        );
    }

    #[test]
    fn parallel_allows_any_order() {
        let signers = plan_signers(
            SigningMode::Parallel,
            &wallet(1),
            &[spec(2, None), spec(3, None), spec(4, None)],
        )
        .unwrap();
        let mut c = credential(SigningMode::Parallel, signers, vec![]);
        let now = Utc::now();
        assert_eq!(eligible_signers(&c).len(), 3);
        apply_signature(&mut c, &wallet(4), &record(BiometricKind::Face, now)).unwrap();
        apply_signature(&mut c, &wallet(2), &record(BiometricKind::Face, now)).unwrap();
        assert_eq!(c.status, CredentialStatus::PartiallySigned);
        assert_eq!(progress(&c).next, vec![wallet(3)]);
        apply_signature(&mut c, &wallet(3), &record(BiometricKind::Face, now)).unwrap();
        assert_eq!(c.status, CredentialStatus::Completed);
    }

    #[test]
    fn outsiders_cannot_sign() {
        let signers = plan_signers(SigningMode::SelfSign, &wallet(1), &[]).unwrap();
        let mut c = credential(SigningMode::SelfSign, signers, vec![]);
        assert_eq!(
            apply_signature(&mut c, &wallet(9), &record(BiometricKind::Face, Utc::now())),
            Err(WorkflowError::NotASigner(wallet(9).to_string()))
        );
        assert_eq!(c.status, CredentialStatus::Pending);
    }

    #[test]
    fn active_field_tracks_first_unsigned_box() {
        let signers = plan_signers(SigningMode::Parallel, &wallet(1), &[spec(2, None), spec(3, None)]).unwrap();
        let mut second = field(2);
        second.page = Some(2);
        let fields = plan_fields(&signers, &[field(3), field(2), second]).unwrap();
        let mut c = credential(SigningMode::Parallel, signers, fields);

        let active = active_field(&c, &wallet(2)).unwrap();
        assert_eq!(active.page, 1);
        apply_signature(&mut c, &wallet(2), &record(BiometricKind::Face, Utc::now())).unwrap();
        assert!(active_field(&c, &wallet(2)).is_none());
        assert!(active_field(&c, &wallet(3)).is_some());
    }
}
