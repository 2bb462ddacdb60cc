//! Account model: identity, role, wallet address and biometric enrolment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Institution,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Institution => "institution",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "student" => Some(Role::Student),
            "institution" => Some(Role::Institution),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// Institutions and admins may issue credentials and browse students.
    pub fn can_issue(&self) -> bool {
        matches!(self, Role::Institution | Role::Admin)
    }
}

/// An Ethereum-style account address, stored lower-cased (`0x` + 40 hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let s = raw.trim();
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| format!("wallet address must start with 0x: {}", s))?;
        if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("wallet address must be 0x followed by 40 hex characters: {}", s));
        }
        Ok(Self(format!("0x{}", body.to_ascii_lowercase())))
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 20 raw address bytes.
    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Validated on construction.
        if let Ok(bytes) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        WalletAddress::parse(&value)
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalizes an email for storage and lookup.
pub fn normalize_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid || email.chars().any(char::is_whitespace) {
        return Err(format!("invalid email address: {}", raw.trim()));
    }
    Ok(email)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BiometricKind {
    Face,
    Fingerprint,
}

impl BiometricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BiometricKind::Face => "face",
            BiometricKind::Fingerprint => "fingerprint",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "face" => Some(BiometricKind::Face),
            "fingerprint" => Some(BiometricKind::Fingerprint),
            _ => None,
        }
    }
}

/// Stored biometric material. Face templates are sealed; fingerprints keep only a digest.
#[derive(Clone, PartialEq, Eq)]
pub enum BiometricEnrollment {
    None,
    Face {
        sealed_template: Vec<u8>,
        enrolled_at: DateTime<Utc>,
    },
    Fingerprint {
        digest: [u8; 32],
        enrolled_at: DateTime<Utc>,
    },
}

impl BiometricEnrollment {
    pub fn kind(&self) -> Option<BiometricKind> {
        match self {
            BiometricEnrollment::None => None,
            BiometricEnrollment::Face { .. } => Some(BiometricKind::Face),
            BiometricEnrollment::Fingerprint { .. } => Some(BiometricKind::Fingerprint),
        }
    }

    pub fn enrolled_at(&self) -> Option<DateTime<Utc>> {
        match self {
            BiometricEnrollment::None => None,
            BiometricEnrollment::Face { enrolled_at, .. }
            | BiometricEnrollment::Fingerprint { enrolled_at, .. } => Some(*enrolled_at),
        }
    }
}

impl fmt::Debug for BiometricEnrollment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            None => f.write_str("BiometricEnrollment::None"),
            Some(kind) => write!(f, "BiometricEnrollment::{}([REDACTED])", kind.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub age: Option<i32>,
    pub role: Role,
    pub wallet_address: WalletAddress,
    pub password_hash: String,
    pub biometric: BiometricEnrollment,
    pub created_at: DateTime<Utc>,
}

/// Account as exposed over the API (no password hash, no biometric material).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub age: Option<i32>,
    pub role: Role,
    #[schema(value_type = String, example = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed")]
    pub wallet_address: WalletAddress,
    pub biometric_setup: bool,
    pub biometric_type: Option<BiometricKind>,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id,
            name: a.name.clone(),
            email: a.email.clone(),
            phone: a.phone.clone(),
            age: a.age,
            role: a.role,
            wallet_address: a.wallet_address.clone(),
            biometric_setup: a.biometric.kind().is_some(),
            biometric_type: a.biometric.kind(),
            created_at: a.created_at,
        }
    }
}

/// A login session. Only the SHA-256 of the bearer token is kept.
#[derive(Debug, Clone)]
pub struct Session {
    pub token_hash: [u8; 32],
    pub account_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
