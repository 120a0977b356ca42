//! Persistence for the triage service: the client rule file and the
//! encrypted analysis log.

pub mod clients;
pub mod database;
pub mod error;
pub mod schema;
pub mod secrets;
pub mod triage_log;
pub mod writer;

pub use clients::ClientStore;
pub use database::Database;
pub use error::StoreError;
pub use secrets::{FieldCipher, SecretError};
pub use triage_log::{DecryptedTriageLog, TriageLogRepo, TriageStats};
pub use writer::spawn_log_writer;
