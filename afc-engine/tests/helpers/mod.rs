//! Test Helper Utilities
//!
//! Shared utilities for testing afc-engine

#![allow(dead_code)]

pub mod db_utils;

pub use db_utils::{create_test_db, create_test_state, create_test_state_with_bus, insert_lead, insert_task};
