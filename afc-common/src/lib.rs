//! # AFC Common Library
//!
//! Shared code for the lead follow-up engine:
//! - Lead, task and interaction models
//! - SQLite document store (leads, tasks)
//! - Change-notification events (ChangeEvent enum + EventBus)
//! - Configuration loading
//! - Timestamp and id helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ids;
pub mod model;
pub mod time;

pub use error::{Error, Result};
pub use ids::{InstallmentId, InteractionId, LeadId, TaskId};
