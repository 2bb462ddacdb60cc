pub mod account;
pub mod biometric;
pub mod credential;
pub mod notarization;
