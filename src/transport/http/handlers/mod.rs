pub mod accounts;
pub mod biometric;
pub mod credentials;
pub mod health;
pub mod institution;
