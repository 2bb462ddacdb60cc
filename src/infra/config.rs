//! Centralized configuration (environment variables + defaults).
//!
//! Everything is read once at startup by [`Config::from_env`]. Missing optional
//! integrations (database, chain, face service) degrade to the in-process
//! fallbacks; malformed values are reported as [`ConfigError`].

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Ethereum JSON-RPC notary settings. Present only when all three of
/// `ETH_RPC_URL`, `CREDENTIAL_CONTRACT_ADDRESS` and `NOTARY_FROM_ADDRESS` are set.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub contract_address: String,
    pub from_address: String,
    pub receipt_poll_attempts: u32,
    pub receipt_poll_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct FaceServiceConfig {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct Config {
    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub bind_addr: String,
    /// Allowed CORS origins; empty means any origin.
    pub cors_origins: Vec<String>,
    pub biometric_secret: String,
    pub face_match_threshold: f64,
    pub face_service: Option<FaceServiceConfig>,
    pub chain: Option<ChainConfig>,
    /// Prefix for explorer links, e.g. `https://sepolia.etherscan.io/tx/`.
    pub explorer_tx_url: Option<String>,
    pub notary_retry_interval: Duration,
    pub notary_max_attempts: u32,
    pub document_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub session_ttl: Duration,
    pub log_json: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("db_max_connections", &self.db_max_connections)
            .field("bind_addr", &self.bind_addr)
            .field("cors_origins", &self.cors_origins)
            .field("biometric_secret", &"[REDACTED]")
            .field("face_match_threshold", &self.face_match_threshold)
            .field("face_service", &self.face_service)
            .field("chain", &self.chain)
            .field("explorer_tx_url", &self.explorer_tx_url)
            .field("notary_retry_interval", &self.notary_retry_interval)
            .field("notary_max_attempts", &self.notary_max_attempts)
            .field("document_dir", &self.document_dir)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("session_ttl", &self.session_ttl)
            .field("log_json", &self.log_json)
            .finish()
    }
}

pub const MIN_BIOMETRIC_SECRET_LEN: usize = 16;

impl Config {
    /// Loads `.env` (if present) and parses the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Parses configuration from an arbitrary variable lookup (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let biometric_secret = get("BIOMETRIC_SECRET").ok_or(ConfigError::Missing("BIOMETRIC_SECRET"))?;
        if biometric_secret.len() < MIN_BIOMETRIC_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "BIOMETRIC_SECRET",
                reason: format!("must be at least {} characters", MIN_BIOMETRIC_SECRET_LEN),
            });
        }

        let chain = match (
            get("ETH_RPC_URL"),
            get("CREDENTIAL_CONTRACT_ADDRESS"),
            get("NOTARY_FROM_ADDRESS"),
        ) {
            (None, None, None) => None,
            (Some(rpc_url), Some(contract_address), Some(from_address)) => Some(ChainConfig {
                rpc_url,
                contract_address,
                from_address,
                receipt_poll_attempts: parse_or(&get, "RECEIPT_POLL_ATTEMPTS", 10u32)?,
                receipt_poll_interval: Duration::from_millis(parse_or(&get, "RECEIPT_POLL_INTERVAL_MS", 1500u64)?),
                timeout: Duration::from_secs(parse_or(&get, "ETH_RPC_TIMEOUT_SECS", 30u64)?),
            }),
            _ => {
                return Err(ConfigError::Invalid {
                    name: "ETH_RPC_URL",
                    reason: "ETH_RPC_URL, CREDENTIAL_CONTRACT_ADDRESS and NOTARY_FROM_ADDRESS must be set together"
                        .to_string(),
                })
            }
        };

        let face_service = match get("FACE_SERVICE_URL") {
            Some(url) => Some(FaceServiceConfig {
                url: url.trim_end_matches('/').to_string(),
                timeout: Duration::from_secs(parse_or(&get, "FACE_SERVICE_TIMEOUT_SECS", 10u64)?),
            }),
            None => None,
        };

        let face_match_threshold: f64 = parse_or(&get, "FACE_MATCH_THRESHOLD", 0.2f64)?;
        if !face_match_threshold.is_finite() || face_match_threshold <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "FACE_MATCH_THRESHOLD",
                reason: "must be a positive number".to_string(),
            });
        }

        let document_dir = get("DOCUMENT_DIR").unwrap_or_else(|| "./documents".to_string());
        let document_dir = PathBuf::from(shellexpand::tilde(&document_dir).into_owned());

        let cors_origins = get("CORS_ORIGINS")
            .map(|v| {
                v.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty() && o != "*")
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url: get("DATABASE_URL"),
            db_max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 5u32)?.max(1),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            cors_origins,
            biometric_secret,
            face_match_threshold,
            face_service,
            chain,
            explorer_tx_url: get("EXPLORER_TX_URL"),
            notary_retry_interval: Duration::from_secs(parse_or(&get, "NOTARY_RETRY_SECS", 30u64)?.max(1)),
            notary_max_attempts: parse_or(&get, "NOTARY_MAX_ATTEMPTS", 5u32)?.max(1),
            document_dir,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", 10 * 1024 * 1024usize)?,
            session_ttl: Duration::from_secs(parse_or(&get, "SESSION_TTL_SECS", 86_400u64)?.max(60)),
            log_json: get("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false),
        })
    }
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_with_only_secret() {
        let cfg = Config::from_lookup(lookup(&[("BIOMETRIC_SECRET", "0123456789abcdef")])).unwrap();
        assert!(cfg.database_url.is_none());
        assert!(cfg.chain.is_none());
        assert!(cfg.face_service.is_none());
        assert_eq!(cfg.bind_addr, "0.0.0.0:5000");
        assert_eq!(cfg.notary_max_attempts, 5);
        assert_eq!(cfg.max_upload_bytes, 10 * 1024 * 1024);
        assert!((cfg.face_match_threshold - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_or_short_secret_is_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[])),
            Err(ConfigError::Missing("BIOMETRIC_SECRET"))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("BIOMETRIC_SECRET", "short")])),
            Err(ConfigError::Invalid { name: "BIOMETRIC_SECRET", .. })
        ));
    }

    #[test]
    fn partial_chain_config_is_rejected() {
        let res = Config::from_lookup(lookup(&[
            ("BIOMETRIC_SECRET", "0123456789abcdef"),
            ("ETH_RPC_URL", "http://localhost:8545"),
        ]));
        assert!(matches!(res, Err(ConfigError::Invalid { name: "ETH_RPC_URL", .. })));
    }

    #[test]
    fn malformed_number_is_reported() {
        let res = Config::from_lookup(lookup(&[
            ("BIOMETRIC_SECRET", "0123456789abcdef"),
            ("NOTARY_MAX_ATTEMPTS", "many"),
        ]));
        assert!(matches!(res, Err(ConfigError::Invalid { name: "NOTARY_MAX_ATTEMPTS", .. })));
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = Config::from_lookup(lookup(&[
            ("BIOMETRIC_SECRET", "super-secret-value-123"),
            ("DATABASE_URL", "postgres://user:pw@localhost/db"),
        ]))
        .unwrap();
        let rendered = format!("{:?}", cfg);
        assert!(!rendered.contains("super-secret-value-123"));
        assert!(!rendered.contains("user:pw"));
    }
}
