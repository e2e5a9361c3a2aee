//! SQLite document store
//!
//! Leads and tasks are stored as rows; embedded lead documents (phones,
//! interactions, commitment snapshot, payment plan) are JSON columns.
//! Functions take `&mut SqliteConnection` so callers can run them inside a
//! transaction (`&mut *tx`) or on a pooled connection.

pub mod init;
pub mod leads;
pub mod tasks;

pub use init::{init_database, init_schema};
