//! Strummy CRM server library
//!
//! This library exposes the internal modules for the binaries, the
//! end-to-end tests and embedding the engines without HTTP.

pub mod activity;
pub mod background_jobs;
pub mod config;
pub mod crm_store;
pub mod csv_import;
pub mod server;
pub mod server_store;
pub mod sqlite_persistence;
pub mod sync_conflicts;

// Re-export commonly used types for convenience
pub use activity::ActivityEngine;
pub use crm_store::{CrmStore, SqliteCrmStore};
pub use csv_import::CsvImporter;
pub use server::{run_server, RequestsLoggingLevel};
pub use server_store::{ServerStore, SqliteServerStore};
pub use sync_conflicts::ConflictResolver;
