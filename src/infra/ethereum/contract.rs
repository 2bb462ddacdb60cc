//! ABI encoding for the credential registry contract.
//!
//! ```solidity
//! function issueCredential(bytes32 credentialHash, address student) external;
//! ```

use crate::domain::account::WalletAddress;
use primitive_types::H256;

/// keccak256("issueCredential(bytes32,address)")[..4]
pub const ISSUE_CREDENTIAL_SELECTOR: [u8; 4] = [0x49, 0xa2, 0x10, 0x51];

/// `0x`-prefixed calldata: selector, the hash word, then the address left-padded to 32 bytes.
pub fn encode_issue_credential(credential_hash: H256, student: &WalletAddress) -> String {
    let mut data = Vec::with_capacity(4 + 32 + 32);
    data.extend_from_slice(&ISSUE_CREDENTIAL_SELECTOR);
    data.extend_from_slice(credential_hash.as_bytes());
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(&student.to_bytes());
    format!("0x{}", hex::encode(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calldata_layout() {
        let hash = H256::repeat_byte(0xab);
        let student = WalletAddress::parse("0x00000000000000000000000000000000000000ff").unwrap();
        let data = encode_issue_credential(hash, &student);

        assert_eq!(data.len(), 2 + 2 * (4 + 64));
        assert!(data.starts_with("0x49a21051"));
        assert_eq!(&data[10..74], "ab".repeat(32));
        assert_eq!(&data[74..], format!("{}ff", "0".repeat(62)));
    }
}
