//! Matching of captured biometrics against enrolled templates.

use crate::crypto::hashing::sha256;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("embedding must not be empty")]
    Empty,
    #[error("embedding contains a non-finite value")]
    NonFinite,
    #[error("embedding dimensions differ (enrolled {enrolled}, captured {captured})")]
    DimensionMismatch { enrolled: usize, captured: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FaceMatch {
    pub matched: bool,
    pub distance: f64,
    pub confidence: f64,
}

/// What a signer presents to pass the biometric gate.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BiometricProof {
    /// A camera capture, as a base64 string or `data:` URL.
    Face { image: String },
    /// The authenticator credential id produced by the browser.
    Fingerprint { credential_id: String },
}

pub fn validate_embedding(v: &[f64]) -> Result<(), MatchError> {
    if v.is_empty() {
        return Err(MatchError::Empty);
    }
    if !v.iter().all(|x| x.is_finite()) {
        return Err(MatchError::NonFinite);
    }
    Ok(())
}

/// Euclidean-distance match: `matched = distance < threshold`, `confidence = max(0, 1 - distance)`.
pub fn match_face(enrolled: &[f64], captured: &[f64], threshold: f64) -> Result<FaceMatch, MatchError> {
    validate_embedding(enrolled)?;
    validate_embedding(captured)?;
    if enrolled.len() != captured.len() {
        return Err(MatchError::DimensionMismatch {
            enrolled: enrolled.len(),
            captured: captured.len(),
        });
    }
    let distance = enrolled
        .iter()
        .zip(captured)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f64>()
        .sqrt();
    Ok(FaceMatch {
        matched: distance < threshold,
        distance,
        confidence: (1.0 - distance).max(0.0),
    })
}

pub fn fingerprint_digest(credential_id: &str) -> [u8; 32] {
    sha256(credential_id.trim().as_bytes())
}

pub fn verify_fingerprint(enrolled_digest: &[u8; 32], presented: &str) -> bool {
    fingerprint_digest(presented).ct_eq(enrolled_digest).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_match_with_full_confidence() {
        let v = [0.31, 0.22, 0.40, 0.45];
        let m = match_face(&v, &v, 0.2).unwrap();
        assert!(m.matched);
        assert_eq!(m.distance, 0.0);
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn threshold_is_exclusive() {
        let m = match_face(&[0.0, 0.0], &[0.3, 0.4], 0.5).unwrap();
        assert!((m.distance - 0.5).abs() < 1e-12);
        assert!(!m.matched);
        assert!((m.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn confidence_floors_at_zero() {
        let m = match_face(&[0.0], &[3.0], 0.2).unwrap();
        assert!(!m.matched);
        assert_eq!(m.confidence, 0.0);
    }

    #[test]
    fn malformed_embeddings_are_rejected() {
        assert_eq!(match_face(&[], &[], 0.2), Err(MatchError::Empty));
        assert_eq!(match_face(&[f64::NAN], &[0.0], 0.2), Err(MatchError::NonFinite));
        assert_eq!(
            match_face(&[0.1, 0.2], &[0.1], 0.2),
            Err(MatchError::DimensionMismatch { enrolled: 2, captured: 1 })
        );
    }

    #[test]
    fn fingerprint_compare() {
        let d = fingerprint_digest("cred-abc");
        assert!(verify_fingerprint(&d, "cred-abc"));
        assert!(verify_fingerprint(&d, " cred-abc "));
        assert!(!verify_fingerprint(&d, "cred-abd"));
    }

    #[test]
    fn proof_wire_format() {
        let p: BiometricProof = serde_json::from_str(r#"{"kind":"face","image":"aGk="}"#).unwrap();
        assert!(matches!(p, BiometricProof::Face { .. }));
        let p: BiometricProof =
            serde_json::from_str(r#"{"kind":"fingerprint","credential_id":"abc"}"#).unwrap();
        assert!(matches!(p, BiometricProof::Fingerprint { .. }));
    }
}
