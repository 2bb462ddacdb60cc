pub mod app;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod storage;
pub mod transport;

// Convenience re-exports (keeps call-sites clean)
pub use app::{AccountService, AppError, CredentialService};
pub use domain::notarization::{Notary, NotarizationWorker};
pub use infra::config::Config;
pub use storage::{DocumentStore, MemoryStore, PostgresStore, Store};
