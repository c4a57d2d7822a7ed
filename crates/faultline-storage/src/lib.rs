//! Faultline Storage Layer
//!
//! SQLite-based history of every session and the diagnoses made for it.

mod database;
mod error;
mod migrations;
mod records;

pub use database::Database;
pub use error::StorageError;
pub use records::{DiagnosisRecord, RunRecord};

pub type Result<T> = std::result::Result<T, StorageError>;
