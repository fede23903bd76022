//! Error types for ShardRoute
//!
//! This module defines the common error types used throughout the system.

use crate::types::{ConnectionStringParseError, HostParseError, ShardId};
use thiserror::Error;

/// Common result type for ShardRoute operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for ShardRoute
///
/// The enum is `Clone` because a single failed topology fetch is reported to
/// every caller coalesced onto it.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Catalog errors
    #[error("failed to fetch the shard list from the catalog: {0}")]
    CatalogFetch(String),

    // Shard construction errors
    #[error("failed to construct shard {shard_id}: {reason}")]
    ShardConstruction { shard_id: ShardId, reason: String },

    // Lookup errors
    #[error("shard not found: {0}")]
    ShardNotFound(ShardId),

    // Parse errors
    #[error("invalid host: {0}")]
    InvalidHost(#[from] HostParseError),

    #[error("invalid connection string: {0}")]
    InvalidConnectionString(#[from] ConnectionStringParseError),
}

impl Error {
    /// Create a catalog fetch error
    pub fn catalog_fetch(msg: impl Into<String>) -> Self {
        Self::CatalogFetch(msg.into())
    }

    /// Create a shard construction error
    pub fn shard_construction(shard_id: ShardId, reason: impl Into<String>) -> Self {
        Self::ShardConstruction {
            shard_id,
            reason: reason.into(),
        }
    }

    /// Check if this is a retryable error
    ///
    /// A retryable error leaves the previously published topology intact; the
    /// caller may retry the triggering operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CatalogFetch(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ShardNotFound(_))
    }
}
