//! Error types for the DEX event indexer.
//!
//! This module provides a unified error type [`IndexerError`] that encompasses
//! all possible errors that can occur during event harvesting, order decoding,
//! referral replay, and state management.
//!
//! # Design
//!
//! The error hierarchy is organized by layer:
//! - [`IndexerError::ConfigError`]: Configuration and environment issues
//! - [`IndexerError::RpcError`]: RPC provider and network errors
//! - [`IndexerError::DecodingError`]: Event/ABI decoding and parsing errors
//! - [`IndexerError::StateError`]: Replay state and validation errors
//! - [`IndexerError::MathError`]: Arithmetic and order-decode errors
//! - [`IndexerError::DatabaseError`]: Persistence errors
//! - [`IndexerError::MissingReference`]: An event refers to a token or pair
//!   that is not yet known to this deployment
//!
//! All errors implement [`std::error::Error`] and include rich context via
//! the source error chain. Database errors additionally expose two
//! classification helpers, [`IndexerError::is_duplicate_key`] and
//! [`IndexerError::is_missing_schema`], which drive the recoverable paths in
//! the harvester (row-by-row merge retry and feature-not-migrated skip).
//!
//! # Example
//!
//! ```
//! use dex_event_indexer::error::{IndexerError, IndexerResult};
//!
//! fn validate_batch(batch_size: u64) -> IndexerResult<()> {
//!     if batch_size == 0 {
//!         return Err(IndexerError::config("batch size cannot be zero", None));
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;

/// Result type alias using [`IndexerError`].
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Unified error type for the DEX event indexer.
///
/// This enum encompasses all error types that can occur during:
/// - Configuration loading
/// - RPC provider operations
/// - Event and ABI decoding
/// - Referral replay state management
/// - Order decoding math
/// - Database persistence
#[derive(Debug)]
pub enum IndexerError {
    /// Configuration or environment variable errors.
    ConfigError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// RPC provider or network errors.
    ///
    /// These are transient from the scheduler's point of view: the current
    /// update cycle aborts without a cursor advance and the next tick retries
    /// the same range.
    RpcError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Event or ABI decoding errors.
    DecodingError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Replay state or validation errors.
    StateError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Arithmetic or order-decode errors.
    ///
    /// Variants include overflow while expanding a packed exponent and
    /// out-of-range decimal conversions.
    MathError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database operation errors.
    ///
    /// Use [`IndexerError::is_duplicate_key`] and
    /// [`IndexerError::is_missing_schema`] to classify recoverable cases.
    DatabaseError {
        /// Human-readable error message
        message: String,
        /// Optional underlying error
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An event references a token or pair that is not in the deployment's
    /// dictionaries yet. The affected row is skipped; the batch continues.
    MissingReference {
        /// Human-readable error message naming the missing entity
        message: String,
    },
}

impl IndexerError {
    /// Create a new configuration error.
    ///
    /// # Example
    ///
    /// ```
    /// use dex_event_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::config("RPC_URL not set", None);
    /// assert!(matches!(err, IndexerError::ConfigError { .. }));
    /// ```
    #[must_use]
    pub fn config(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::ConfigError {
            message: message.into(),
            source,
        }
    }

    /// Create a new RPC error.
    ///
    /// # Example
    ///
    /// ```
    /// use dex_event_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::rpc("Failed to connect to provider", None);
    /// assert!(matches!(err, IndexerError::RpcError { .. }));
    /// ```
    #[must_use]
    pub fn rpc(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::RpcError {
            message: message.into(),
            source,
        }
    }

    /// Create a new decoding error.
    #[must_use]
    pub fn decoding(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::DecodingError {
            message: message.into(),
            source,
        }
    }

    /// Create a new state error.
    #[must_use]
    pub fn state(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::StateError {
            message: message.into(),
            source,
        }
    }

    /// Create a new math error.
    ///
    /// # Example
    ///
    /// ```
    /// use dex_event_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::math("packed exponent overflows decimal range", None);
    /// assert!(matches!(err, IndexerError::MathError { .. }));
    /// ```
    #[must_use]
    pub fn math(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::MathError {
            message: message.into(),
            source,
        }
    }

    /// Create a new database error.
    #[must_use]
    pub fn database(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source,
        }
    }

    /// Create a new missing-reference error.
    ///
    /// # Example
    ///
    /// ```
    /// use dex_event_indexer::error::IndexerError;
    ///
    /// let err = IndexerError::missing_reference("unknown token 0xdead...beef");
    /// assert!(matches!(err, IndexerError::MissingReference { .. }));
    /// ```
    #[must_use]
    pub fn missing_reference(message: impl Into<String>) -> Self {
        Self::MissingReference {
            message: message.into(),
        }
    }

    /// Whether this error is a duplicate-key violation on save.
    ///
    /// The harvester treats duplicate keys as recoverable: the failed chunk
    /// is retried row-by-row with a merge upsert instead of failing the
    /// whole batch.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        match self {
            Self::DatabaseError { message, source } => {
                let source_text = source.as_ref().map(ToString::to_string).unwrap_or_default();
                message.contains("UNIQUE constraint failed")
                    || source_text.contains("UNIQUE constraint failed")
                    || source_text.contains("2067")
            }
            _ => false,
        }
    }

    /// Whether this error indicates a table that has not been migrated yet.
    ///
    /// Treated as "feature disabled for this deployment": the affected stream
    /// is logged and skipped, never fatal.
    #[must_use]
    pub fn is_missing_schema(&self) -> bool {
        match self {
            Self::DatabaseError { message, source } => {
                let source_text = source.as_ref().map(ToString::to_string).unwrap_or_default();
                message.contains("no such table") || source_text.contains("no such table")
            }
            _ => false,
        }
    }
}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigError { message, .. } => write!(f, "Configuration error: {message}"),
            Self::RpcError { message, .. } => write!(f, "RPC error: {message}"),
            Self::DecodingError { message, .. } => write!(f, "Decoding error: {message}"),
            Self::StateError { message, .. } => write!(f, "State error: {message}"),
            Self::MathError { message, .. } => write!(f, "Math error: {message}"),
            Self::DatabaseError { message, .. } => write!(f, "Database error: {message}"),
            Self::MissingReference { message } => write!(f, "Missing reference: {message}"),
        }
    }
}

impl std::error::Error for IndexerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConfigError { source, .. }
            | Self::RpcError { source, .. }
            | Self::DecodingError { source, .. }
            | Self::StateError { source, .. }
            | Self::MathError { source, .. }
            | Self::DatabaseError { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &dyn std::error::Error),
            Self::MissingReference { .. } => None,
        }
    }
}

/// Convert from `eyre::Report` to `IndexerError`.
///
/// This is primarily used for wrapping eyre errors that don't fit into
/// a specific category. The error is categorized as an RPC error by default.
impl From<eyre::Report> for IndexerError {
    fn from(err: eyre::Report) -> Self {
        Self::RpcError {
            message: err.to_string(),
            source: None,
        }
    }
}
