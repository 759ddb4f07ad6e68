//! Error types for the resolver and the PubMed client.

use std::time::Duration;

/// Errors that can occur while resolving a citation or talking to a catalog.
///
/// Inside the cascade most of these are recovered (logged and treated as an
/// empty strategy); only [`ResolverError::EmptyQuery`] and configuration
/// errors reach a caller of [`crate::Resolver::resolve`].
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// HTTP request failed (network, TLS, connect timeout, etc.)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The catalog or evaluator endpoint returned an error status code.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Rate limited by the remote service (HTTP 429).
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Failed to parse a catalog response.
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Resource not found (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A suspension point exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The query carried no usable field at all.
    #[error("Query keywords are empty: at least one field is required")]
    EmptyQuery,

    /// The semantic evaluator failed or returned nothing usable.
    #[error("Evaluator error: {0}")]
    Evaluator(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResolverError {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::RateLimited { .. } | Self::Timeout { .. }
        ) || matches!(self, Self::Api { status, .. } if *status >= 500)
    }
}

/// Convenience alias for Results using [`ResolverError`].
pub type Result<T> = std::result::Result<T, ResolverError>;
