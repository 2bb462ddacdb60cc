//! Postgres-backed store.
//!
//! The schema is created idempotently on startup. Signing runs inside one
//! transaction holding `SELECT ... FOR UPDATE` on the credential row, so two
//! signers racing on the same credential are serialized.

use super::{AccountStore, CredentialStore, Store, StoreError};
use crate::domain::account::{Account, BiometricEnrollment, BiometricKind, Role, Session, WalletAddress};
use crate::domain::credential::{
    self, Credential, CredentialStatus, FieldRect, Notarization, NotarizationState, SignatureField,
    SignatureRecord, Signer, SigningMode,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS accounts (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        phone TEXT,
        age INTEGER,
        role TEXT NOT NULL,
        wallet_address TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        biometric_type TEXT,
        biometric_template BYTEA,
        biometric_enrolled_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )",
    "CREATE TABLE IF NOT EXISTS sessions (
        token_hash BYTEA PRIMARY KEY,
        account_id UUID NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
        expires_at TIMESTAMPTZ NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS credentials (
        credential_id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        purpose TEXT NOT NULL,
        document_path TEXT NOT NULL,
        document_digest TEXT,
        issuer_wallet TEXT NOT NULL,
        student_wallet TEXT NOT NULL,
        signing_mode TEXT NOT NULL,
        status TEXT NOT NULL,
        credential_hash TEXT NOT NULL,
        notary_state TEXT NOT NULL,
        tx_hash TEXT,
        block_number BIGINT,
        notary_attempts INTEGER NOT NULL DEFAULT 0,
        notary_last_error TEXT,
        notary_updated_at TIMESTAMPTZ NOT NULL,
        issued_at TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS credential_signers (
        credential_id TEXT NOT NULL REFERENCES credentials(credential_id) ON DELETE CASCADE,
        signer_public_key TEXT NOT NULL,
        signer_order INTEGER NOT NULL,
        signed BOOLEAN NOT NULL DEFAULT FALSE,
        signed_at TIMESTAMPTZ,
        verification TEXT,
        confidence DOUBLE PRECISION,
        wallet_signature TEXT,
        PRIMARY KEY (credential_id, signer_public_key),
        UNIQUE (credential_id, signer_order)
    )",
    "CREATE TABLE IF NOT EXISTS signature_fields (
        credential_id TEXT NOT NULL REFERENCES credentials(credential_id) ON DELETE CASCADE,
        position INTEGER NOT NULL,
        signer_public_key TEXT NOT NULL,
        x_ratio DOUBLE PRECISION NOT NULL,
        y_ratio DOUBLE PRECISION NOT NULL,
        width_ratio DOUBLE PRECISION NOT NULL,
        height_ratio DOUBLE PRECISION NOT NULL,
        page INTEGER NOT NULL DEFAULT 1,
        color TEXT NOT NULL,
        signed BOOLEAN NOT NULL DEFAULT FALSE,
        PRIMARY KEY (credential_id, position)
    )",
    "ALTER TABLE credential_signers ADD COLUMN IF NOT EXISTS wallet_signature TEXT",
    "CREATE INDEX IF NOT EXISTS credential_signers_key_idx ON credential_signers (signer_public_key)",
    "CREATE INDEX IF NOT EXISTS credentials_hash_idx ON credentials (credential_hash)",
    "CREATE INDEX IF NOT EXISTS credentials_notary_idx ON credentials (notary_state, notary_updated_at)",
];

const ACCOUNT_COLUMNS: &str = "id, name, email, phone, age, role, wallet_address, password_hash, \
     biometric_type, biometric_template, biometric_enrolled_at, created_at";

const CREDENTIAL_COLUMNS: &str = "credential_id, title, purpose, document_path, document_digest, \
     issuer_wallet, student_wallet, signing_mode, status, credential_hash, notary_state, tx_hash, \
     block_number, notary_attempts, notary_last_error, notary_updated_at, issued_at, completed_at";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects and ensures the schema exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::debug!("database schema ensured");
        Ok(())
    }

    async fn fetch_account(&self, clause: &str, bind: AccountKey<'_>) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {} FROM accounts WHERE {}", ACCOUNT_COLUMNS, clause);
        let query = sqlx::query(&sql);
        let query = match bind {
            AccountKey::Id(id) => query.bind(id),
            AccountKey::Text(s) => query.bind(s),
        };
        query
            .fetch_optional(&self.pool)
            .await?
            .map(|row| account_from_row(&row))
            .transpose()
    }
}

enum AccountKey<'a> {
    Id(Uuid),
    Text(&'a str),
}

fn map_unique_violation(err: sqlx::Error, what: String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => StoreError::Conflict(what),
        _ => StoreError::Database(err),
    }
}

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("unexpected {} value '{}'", what, value))
}

fn wallet(value: String) -> Result<WalletAddress, StoreError> {
    WalletAddress::parse(&value).map_err(StoreError::Corrupt)
}

fn account_from_row(row: &PgRow) -> Result<Account, StoreError> {
    let role: String = row.try_get("role")?;
    let biometric_type: Option<String> = row.try_get("biometric_type")?;
    let template: Option<Vec<u8>> = row.try_get("biometric_template")?;
    let enrolled_at: Option<DateTime<Utc>> = row.try_get("biometric_enrolled_at")?;

    let biometric = match (biometric_type.as_deref(), template, enrolled_at) {
        (None, _, _) => BiometricEnrollment::None,
        (Some("face"), Some(sealed_template), Some(enrolled_at)) => BiometricEnrollment::Face {
            sealed_template,
            enrolled_at,
        },
        (Some("fingerprint"), Some(bytes), Some(enrolled_at)) => {
            let digest: [u8; 32] = bytes
                .try_into()
                .map_err(|_| StoreError::Corrupt("fingerprint digest must be 32 bytes".to_string()))?;
            BiometricEnrollment::Fingerprint { digest, enrolled_at }
        }
        (Some(other), _, _) => return Err(corrupt("biometric_type", other)),
    };

    Ok(Account {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        age: row.try_get("age")?,
        role: Role::parse(&role).ok_or_else(|| corrupt("role", &role))?,
        wallet_address: wallet(row.try_get("wallet_address")?)?,
        password_hash: row.try_get("password_hash")?,
        biometric,
        created_at: row.try_get("created_at")?,
    })
}

/// Loads one credential with its signers and fields using the given connection.
/// With `for_update`, the credential row stays locked until the surrounding transaction ends.
async fn load_credential(
    conn: &mut PgConnection,
    credential_id: &str,
    for_update: bool,
) -> Result<Option<Credential>, StoreError> {
    let sql = format!(
        "SELECT {} FROM credentials WHERE credential_id = $1{}",
        CREDENTIAL_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = match sqlx::query(&sql).bind(credential_id).fetch_optional(&mut *conn).await? {
        Some(r) => r,
        None => return Ok(None),
    };

    let signer_rows = sqlx::query(
        "SELECT signer_public_key, signer_order, signed, signed_at, verification, confidence, wallet_signature
         FROM credential_signers WHERE credential_id = $1 ORDER BY signer_order",
    )
    .bind(credential_id)
    .fetch_all(&mut *conn)
    .await?;

    let field_rows = sqlx::query(
        "SELECT signer_public_key, x_ratio, y_ratio, width_ratio, height_ratio, page, color, signed
         FROM signature_fields WHERE credential_id = $1 ORDER BY position",
    )
    .bind(credential_id)
    .fetch_all(&mut *conn)
    .await?;

    let signers = signer_rows
        .iter()
        .map(signer_from_row)
        .collect::<Result<Vec<_>, _>>()?;
    let fields = field_rows
        .iter()
        .map(field_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    credential_from_row(&row, signers, fields).map(Some)
}

fn signer_from_row(row: &PgRow) -> Result<Signer, StoreError> {
    let order: i32 = row.try_get("signer_order")?;
    let verification: Option<String> = row.try_get("verification")?;
    Ok(Signer {
        public_key: wallet(row.try_get("signer_public_key")?)?,
        order: u32::try_from(order).map_err(|_| corrupt("signer_order", &order.to_string()))?,
        signed: row.try_get("signed")?,
        signed_at: row.try_get("signed_at")?,
        verification: match verification {
            Some(v) => Some(BiometricKind::parse(&v).ok_or_else(|| corrupt("verification", &v))?),
            None => None,
        },
        confidence: row.try_get("confidence")?,
        wallet_signature: row.try_get("wallet_signature")?,
    })
}

fn field_from_row(row: &PgRow) -> Result<SignatureField, StoreError> {
    let page: i32 = row.try_get("page")?;
    Ok(SignatureField {
        signer_public_key: wallet(row.try_get("signer_public_key")?)?,
        rect: FieldRect {
            x: row.try_get("x_ratio")?,
            y: row.try_get("y_ratio")?,
            width: row.try_get("width_ratio")?,
            height: row.try_get("height_ratio")?,
        },
        page: u32::try_from(page).map_err(|_| corrupt("page", &page.to_string()))?,
        color: row.try_get("color")?,
        signed: row.try_get("signed")?,
    })
}

fn credential_from_row(
    row: &PgRow,
    signers: Vec<Signer>,
    signature_fields: Vec<SignatureField>,
) -> Result<Credential, StoreError> {
    let mode: String = row.try_get("signing_mode")?;
    let status: String = row.try_get("status")?;
    let notary_state: String = row.try_get("notary_state")?;
    let block_number: Option<i64> = row.try_get("block_number")?;
    let attempts: i32 = row.try_get("notary_attempts")?;

    Ok(Credential {
        credential_id: row.try_get("credential_id")?,
        title: row.try_get("title")?,
        purpose: row.try_get("purpose")?,
        document_path: row.try_get("document_path")?,
        document_digest: row.try_get("document_digest")?,
        issuer_wallet: wallet(row.try_get("issuer_wallet")?)?,
        student_wallet: wallet(row.try_get("student_wallet")?)?,
        signing_mode: SigningMode::parse(&mode).ok_or_else(|| corrupt("signing_mode", &mode))?,
        signers,
        signature_fields,
        status: CredentialStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        credential_hash: row.try_get("credential_hash")?,
        notarization: Notarization {
            state: NotarizationState::parse(&notary_state).ok_or_else(|| corrupt("notary_state", &notary_state))?,
            tx_hash: row.try_get("tx_hash")?,
            block_number: block_number.map(|b| b.max(0) as u64),
            attempts: attempts.max(0) as u32,
            last_error: row.try_get("notary_last_error")?,
            updated_at: row.try_get("notary_updated_at")?,
        },
        issued_at: row.try_get("issued_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn biometric_columns(e: &BiometricEnrollment) -> (Option<&'static str>, Option<Vec<u8>>, Option<DateTime<Utc>>) {
    match e {
        BiometricEnrollment::None => (None, None, None),
        BiometricEnrollment::Face {
            sealed_template,
            enrolled_at,
        } => (Some("face"), Some(sealed_template.clone()), Some(*enrolled_at)),
        BiometricEnrollment::Fingerprint { digest, enrolled_at } => {
            (Some("fingerprint"), Some(digest.to_vec()), Some(*enrolled_at))
        }
    }
}

#[async_trait]
impl AccountStore for PostgresStore {
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let (bio_type, bio_template, bio_at) = biometric_columns(&account.biometric);
        sqlx::query(
            "INSERT INTO accounts
             (id, name, email, phone, age, role, wallet_address, password_hash,
              biometric_type, biometric_template, biometric_enrolled_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.email)
        .bind(&account.phone)
        .bind(account.age)
        .bind(account.role.as_str())
        .bind(account.wallet_address.as_str())
        .bind(&account.password_hash)
        .bind(bio_type)
        .bind(bio_template)
        .bind(bio_at)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique_violation(e, "account with this email or wallet".to_string()))?;
        Ok(())
    }

    async fn account_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        self.fetch_account("id = $1", AccountKey::Id(id)).await
    }

    async fn account_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.fetch_account("email = $1", AccountKey::Text(email)).await
    }

    async fn account_by_wallet(&self, wallet: &WalletAddress) -> Result<Option<Account>, StoreError> {
        self.fetch_account("wallet_address = $1", AccountKey::Text(wallet.as_str()))
            .await
    }

    async fn accounts_by_role(&self, role: Role) -> Result<Vec<Account>, StoreError> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE role = $1 ORDER BY name, email",
            ACCOUNT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(account_from_row)
            .collect()
    }

    async fn set_biometric(&self, id: Uuid, enrollment: &BiometricEnrollment) -> Result<(), StoreError> {
        let (bio_type, bio_template, bio_at) = biometric_columns(enrollment);
        let result = sqlx::query(
            "UPDATE accounts
             SET biometric_type = $2, biometric_template = $3, biometric_enrolled_at = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(bio_type)
        .bind(bio_template)
        .bind(bio_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("account {}", id)));
        }
        Ok(())
    }

    async fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO sessions (token_hash, account_id, expires_at) VALUES ($1, $2, $3)")
            .bind(&session.token_hash[..])
            .bind(session.account_id)
            .bind(session.expires_at)
            .execute(&self.pool)
            .await?;
        // Opportunistic cleanup of expired sessions.
        sqlx::query("DELETE FROM sessions WHERE expires_at < now()")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn session(&self, token_hash: &[u8; 32]) -> Result<Option<Session>, StoreError> {
        let row = sqlx::query("SELECT account_id, expires_at FROM sessions WHERE token_hash = $1")
            .bind(&token_hash[..])
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Session {
                token_hash: *token_hash,
                account_id: row.try_get("account_id")?,
                expires_at: row.try_get("expires_at")?,
            })),
            None => Ok(None),
        }
    }

    async fn delete_session(&self, token_hash: &[u8; 32]) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
            .bind(&token_hash[..])
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn insert_credential(&self, c: &Credential) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO credentials
             (credential_id, title, purpose, document_path, document_digest, issuer_wallet,
              student_wallet, signing_mode, status, credential_hash, notary_state, tx_hash,
              block_number, notary_attempts, notary_last_error, notary_updated_at, issued_at, completed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(&c.credential_id)
        .bind(&c.title)
        .bind(&c.purpose)
        .bind(&c.document_path)
        .bind(&c.document_digest)
        .bind(c.issuer_wallet.as_str())
        .bind(c.student_wallet.as_str())
        .bind(c.signing_mode.as_str())
        .bind(c.status.as_str())
        .bind(&c.credential_hash)
        .bind(c.notarization.state.as_str())
        .bind(&c.notarization.tx_hash)
        .bind(c.notarization.block_number.map(|b| b as i64))
        .bind(c.notarization.attempts as i32)
        .bind(&c.notarization.last_error)
        .bind(c.notarization.updated_at)
        .bind(c.issued_at)
        .bind(c.completed_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, format!("credential {}", c.credential_id)))?;

        for s in &c.signers {
            sqlx::query(
                "INSERT INTO credential_signers
                 (credential_id, signer_public_key, signer_order, signed, signed_at, verification, confidence,
                  wallet_signature)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(&c.credential_id)
            .bind(s.public_key.as_str())
            .bind(s.order as i32)
            .bind(s.signed)
            .bind(s.signed_at)
            .bind(s.verification.map(|v| v.as_str()))
            .bind(s.confidence)
            .bind(&s.wallet_signature)
            .execute(&mut *tx)
            .await?;
        }

        for (position, f) in c.signature_fields.iter().enumerate() {
            sqlx::query(
                "INSERT INTO signature_fields
                 (credential_id, position, signer_public_key, x_ratio, y_ratio, width_ratio,
                  height_ratio, page, color, signed)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(&c.credential_id)
            .bind(position as i32)
            .bind(f.signer_public_key.as_str())
            .bind(f.rect.x)
            .bind(f.rect.y)
            .bind(f.rect.width)
            .bind(f.rect.height)
            .bind(f.page as i32)
            .bind(&f.color)
            .bind(f.signed)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn credential(&self, credential_id: &str) -> Result<Option<Credential>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_credential(&mut conn, credential_id, false).await
    }

    async fn credential_by_hash(&self, credential_hash: &str) -> Result<Option<Credential>, StoreError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT credential_id FROM credentials WHERE credential_hash = $1 LIMIT 1")
                .bind(credential_hash)
                .fetch_optional(&self.pool)
                .await?;
        match id {
            Some(id) => self.credential(&id).await,
            None => Ok(None),
        }
    }

    async fn credentials_for(&self, wallet: &WalletAddress) -> Result<Vec<Credential>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT c.credential_id FROM credentials c
             WHERE c.issuer_wallet = $1 OR c.student_wallet = $1
                OR EXISTS (SELECT 1 FROM credential_signers s
                           WHERE s.credential_id = c.credential_id AND s.signer_public_key = $1)
             ORDER BY c.issued_at DESC",
        )
        .bind(wallet.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(c) = load_credential(&mut conn, &id, false).await? {
                out.push(c);
            }
        }
        Ok(out)
    }

    async fn apply_signature(
        &self,
        credential_id: &str,
        signer: &WalletAddress,
        record: &SignatureRecord,
    ) -> Result<Credential, StoreError> {
        let mut tx = self.pool.begin().await?;

        let mut c = load_credential(&mut tx, credential_id, true)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("credential {}", credential_id)))?;

        // Rejections return early; dropping `tx` rolls back and releases the row lock.
        credential::apply_signature(&mut c, signer, record)?;

        sqlx::query(
            "UPDATE credential_signers
             SET signed = TRUE, signed_at = $3, verification = $4, confidence = $5, wallet_signature = $6
             WHERE credential_id = $1 AND signer_public_key = $2",
        )
        .bind(credential_id)
        .bind(signer.as_str())
        .bind(record.at)
        .bind(record.verification.as_str())
        .bind(record.confidence)
        .bind(&record.wallet_signature)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE signature_fields SET signed = TRUE
             WHERE credential_id = $1 AND signer_public_key = $2",
        )
        .bind(credential_id)
        .bind(signer.as_str())
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE credentials SET status = $2, completed_at = $3 WHERE credential_id = $1")
            .bind(credential_id)
            .bind(c.status.as_str())
            .bind(c.completed_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(c)
    }

    async fn update_notarization(&self, credential_id: &str, n: &Notarization) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE credentials
             SET notary_state = $2, tx_hash = $3, block_number = $4, notary_attempts = $5,
                 notary_last_error = $6, notary_updated_at = $7
             WHERE credential_id = $1",
        )
        .bind(credential_id)
        .bind(n.state.as_str())
        .bind(&n.tx_hash)
        .bind(n.block_number.map(|b| b as i64))
        .bind(n.attempts as i32)
        .bind(&n.last_error)
        .bind(n.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("credential {}", credential_id)));
        }
        Ok(())
    }

    async fn unsettled_notarizations(&self, before: DateTime<Utc>, limit: i64) -> Result<Vec<Credential>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT credential_id FROM credentials
             WHERE notary_state IN ('pending', 'submitted') AND notary_updated_at < $1
             ORDER BY notary_updated_at
             LIMIT $2",
        )
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut conn = self.pool.acquire().await?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(c) = load_credential(&mut conn, &id, false).await? {
                out.push(c);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
