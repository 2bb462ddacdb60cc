//! Wallet-ownership proofs: recovery of the signer of an EIP-191 `personal_sign` message.

use crate::domain::account::WalletAddress;
use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use thiserror::Error;

const PERSONAL_MESSAGE_PREFIX: &str = "\x19Ethereum Signed Message:\n";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletSignatureError {
    #[error("wallet signature must be 65 bytes of hex")]
    Malformed,
    #[error("wallet signature has an invalid recovery id")]
    RecoveryId,
    #[error("wallet signature does not recover to a public key")]
    Unrecoverable,
}

pub fn keccak256(bytes: &[u8]) -> [u8; 32] {
    Keccak256::digest(bytes).into()
}

/// The digest a wallet signs for `personal_sign(message)`.
pub fn personal_message_digest(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PERSONAL_MESSAGE_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// The Ethereum address of a secp256k1 public key.
pub fn address_of(key: &VerifyingKey) -> WalletAddress {
    let point = key.to_encoded_point(false);
    // Uncompressed SEC1: 0x04 || X || Y
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    WalletAddress::from_bytes(address)
}

/// Canonical `0x`-prefixed lower-case hex of a 65-byte `r || s || v` signature.
pub fn normalize_signature(raw: &str) -> Result<String, WalletSignatureError> {
    Ok(format!("0x{}", hex::encode(decode_signature(raw)?)))
}

fn decode_signature(raw: &str) -> Result<[u8; 65], WalletSignatureError> {
    let s = raw.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|_| WalletSignatureError::Malformed)?;
    bytes.try_into().map_err(|_| WalletSignatureError::Malformed)
}

/// Recovers the wallet that produced `signature` over `personal_sign(message)`.
/// Accepts `v` as 27/28 (wallets) or 0/1.
pub fn recover_signer(message: &str, signature: &str) -> Result<WalletAddress, WalletSignatureError> {
    let bytes = decode_signature(signature)?;
    let v = match bytes[64] {
        27 | 28 => bytes[64] - 27,
        0 | 1 => bytes[64],
        _ => return Err(WalletSignatureError::RecoveryId),
    };
    let recovery_id = RecoveryId::from_byte(v).ok_or(WalletSignatureError::RecoveryId)?;
    let sig = Signature::from_slice(&bytes[..64]).map_err(|_| WalletSignatureError::Malformed)?;
    let key = VerifyingKey::recover_from_prehash(&personal_message_digest(message), &sig, recovery_id)
        .map_err(|_| WalletSignatureError::Unrecoverable)?;
    Ok(address_of(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::SigningKey;

    fn personal_sign(key: &SigningKey, message: &str) -> String {
        let (sig, recid) = key
            .sign_prehash_recoverable(&personal_message_digest(message))
            .unwrap();
        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }

    fn key(seed: u8) -> SigningKey {
        let mut secret = [0u8; 32];
        secret[31] = seed;
        SigningKey::from_slice(&secret).unwrap()
    }

    #[test]
    fn keccak_vectors() {
        assert_eq!(
            hex::encode(keccak256(b"")),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
        assert_eq!(
            hex::encode(personal_message_digest("hello")),
            "50b2c43fd39106bafbba0da34fc430e1f91e3c96ea2acee2bc34119f92b37750"
        );
        assert_eq!(&keccak256(b"issueCredential(bytes32,address)")[..4], &[0x49, 0xa2, 0x10, 0x51]);
    }

    #[test]
    fn address_of_known_key() {
        assert_eq!(
            address_of(key(1).verifying_key()).as_str(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn recovers_the_signing_wallet() {
        let signer = key(7);
        let sig = personal_sign(&signer, "sign CERT-1");
        assert_eq!(
            recover_signer("sign CERT-1", &sig).unwrap(),
            address_of(signer.verifying_key())
        );
        // Same signature over a different message recovers someone else.
        assert_ne!(
            recover_signer("sign CERT-2", &sig).ok(),
            Some(address_of(signer.verifying_key()))
        );
    }

    #[test]
    fn rejects_malformed_signatures() {
        assert_eq!(recover_signer("m", "0x1234"), Err(WalletSignatureError::Malformed));
        assert_eq!(recover_signer("m", "not hex"), Err(WalletSignatureError::Malformed));
        let mut bad_v = personal_sign(&key(3), "m");
        bad_v.replace_range(bad_v.len() - 2.., "05");
        assert_eq!(recover_signer("m", &bad_v), Err(WalletSignatureError::RecoveryId));
        let upper = personal_sign(&key(3), "m").to_uppercase().replacen("0X", "0x", 1);
        assert_eq!(normalize_signature(&upper).unwrap(), personal_sign(&key(3), "m"));
    }
}
