//! Error types for the Tessera library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`TesseraError`] enum. Expected conditions are not errors: a forward-store
//! miss is `Ok(None)` and a rate-limited discovery call is an empty endpoint
//! list.
//!
//! # Examples
//!
//! ```
//! use tessera::error::{TesseraError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(TesseraError::invalid_argument("document id is empty"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

use crate::cluster::coordinator::LeaseId;

/// The main error type for Tessera operations.
#[derive(Error, Debug)]
pub enum TesseraError {
    /// I/O errors (store files, sockets).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Binary encoding or decoding of a document or store record failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// JSON serialization/deserialization errors (config files, CLI input).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Forward-store errors.
    #[error("Store error: {0}")]
    Store(String),

    /// Coordination-store errors (lease grant, put, watch, txn).
    #[error("Coordination error: {0}")]
    Coordination(String),

    /// A keepalive was sent for a lease that no longer exists.
    #[error("Lease {0} not found")]
    LeaseNotFound(LeaseId),

    /// The distributed lock could not be taken within its retry budget.
    #[error("Failed to acquire lock {key} after {retries} retries")]
    LockUnavailable { key: String, retries: u32 },

    /// A write targeted a shard group with no live endpoints.
    #[error("No endpoints available: {0}")]
    NoEndpoints(String),

    /// A remote index call failed.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// An operation ran past its deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid argument passed by the caller.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with TesseraError.
pub type Result<T> = std::result::Result<T, TesseraError>;

impl TesseraError {
    /// Create a new serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        TesseraError::Serialization(msg.into())
    }

    /// Create a new store error.
    pub fn store<S: Into<String>>(msg: S) -> Self {
        TesseraError::Store(msg.into())
    }

    /// Create a new coordination error.
    pub fn coordination<S: Into<String>>(msg: S) -> Self {
        TesseraError::Coordination(msg.into())
    }

    /// Create a new no-endpoints error.
    pub fn no_endpoints<S: Into<String>>(msg: S) -> Self {
        TesseraError::NoEndpoints(msg.into())
    }

    /// Create a new RPC error.
    pub fn rpc<S: Into<String>>(msg: S) -> Self {
        TesseraError::Rpc(msg.into())
    }

    /// Create a new timeout error.
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        TesseraError::Timeout(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        TesseraError::InvalidArgument(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        TesseraError::InvalidArgument(format!("Invalid configuration: {}", msg.into()))
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        TesseraError::Other(msg.into())
    }

    /// Whether this error reports an expired or unknown lease.
    pub fn is_lease_not_found(&self) -> bool {
        matches!(self, TesseraError::LeaseNotFound(_))
    }
}

impl From<bincode::Error> for TesseraError {
    fn from(err: bincode::Error) -> Self {
        TesseraError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = TesseraError::store("disk full");
        assert_eq!(error.to_string(), "Store error: disk full");

        let error = TesseraError::LockUnavailable {
            key: "/lock".to_string(),
            retries: 3,
        };
        assert_eq!(error.to_string(), "Failed to acquire lock /lock after 3 retries");

        assert!(TesseraError::LeaseNotFound(7).is_lease_not_found());
        assert!(!TesseraError::timeout("search").is_lease_not_found());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let tessera_error = TesseraError::from(io_error);

        match tessera_error {
            TesseraError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }
}
