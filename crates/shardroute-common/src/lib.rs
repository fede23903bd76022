//! ShardRoute Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, and configuration
//! structures used across all ShardRoute components.

pub mod config;
pub mod error;
pub mod types;

pub use config::RegistryConfig;
pub use error::{Error, Result};
pub use types::*;
