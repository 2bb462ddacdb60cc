pub mod hashing;
pub mod password;
pub mod seal;
pub mod token;
pub mod wallet;

pub use hashing::{hash_credential, sha256};
pub use seal::{SealError, TemplateSealer};
