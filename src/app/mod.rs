pub mod account_service;
pub mod credential_service;
pub mod error;

pub use account_service::AccountService;
pub use credential_service::CredentialService;
pub use error::AppError;
