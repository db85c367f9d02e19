//! # billsync Domain
//!
//! Business domain types and models for billsync.
//!
//! This crate contains:
//! - Remote wire records and local rows for customers and charges
//! - Run log types (runs, counts, statuses, phases)
//! - Domain error types and Result definitions
//! - Configuration structures
//! - Domain constants
//!
//! ## Architecture
//! - No dependencies on other billsync crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod constants;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
