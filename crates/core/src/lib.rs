//! # Brandmark Core
//!
//! Shared vocabulary for the brandmark crates: resolution status and snapshots,
//! update hints, persisted metadata, runtime configuration and the error taxonomy.

pub mod manifest;
pub mod protocol;

use thiserror::Error;

pub use manifest::{CacheConfig, PersistedMetadata, RemoteConfig};
pub use protocol::{AssetHint, Snapshot, Status};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrandError {
    /// Configuration endpoint unreachable or its payload could not be decoded.
    #[error("configuration unavailable: {0}")]
    ConfigUnavailable(String),

    /// The probe returned a definitive "absent" answer for this asset.
    #[error("asset '{0}' not found")]
    AssetNotFound(String),

    #[error("request timed out")]
    Timeout,

    /// Any other failure to complete a request (connection, 5xx, redirect loop).
    #[error("transport error: {0}")]
    Transport(String),

    /// An update hint that is missing the fields it needs.
    #[error("malformed hint: {0}")]
    MalformedEvent(String),

    #[error("metadata store error: {0}")]
    Store(String),
}

impl BrandError {
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BrandError::Timeout)
    }
}

pub type BrandResult<T> = Result<T, BrandError>;
