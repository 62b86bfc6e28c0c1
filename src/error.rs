//! Error types for the release operator

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error outside of store operations (client setup, CRD checks)
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Missing or invalid configuration, detected at construction time
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// A store call failed; annotated with the operation that issued it
    #[error("{operation} failed: {source}")]
    Store {
        operation: String,
        #[source]
        source: StoreError,
    },

    /// An object of an unexpected kind reached a typed code path
    #[error("Unexpected object type: expected {expected}, got {actual}")]
    WrongType { expected: String, actual: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Catalog index server answered with a retriable status
    #[error("Catalog index unavailable: {0}")]
    CatalogUnavailable(String),

    /// Catalog index answered but cannot be used (bad status, malformed document)
    #[error("Catalog index {url} unusable: {message}")]
    CatalogIndex { url: String, message: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The pass was cancelled by deadline or shutdown
    #[error("Reconciliation pass cancelled: {0}")]
    Cancelled(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Wrap a store error with the operation that produced it.
    pub fn store(operation: impl Into<String>, source: StoreError) -> Self {
        Error::Store {
            operation: operation.into(),
            source,
        }
    }

    /// Whether retrying the whole pass can reasonably succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Store { source, .. } => source.is_transient(),
            Error::KubeError(e) => crate::store::kube_error_is_transient(e),
            Error::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::CatalogUnavailable(_) => true,
            Error::ConfigError(_)
            | Error::WrongType { .. }
            | Error::CatalogIndex { .. }
            | Error::SerializationError(_)
            | Error::Cancelled(_) => false,
        }
    }

    /// Short category used as a metrics label.
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::ConfigError(_) => "config",
            Error::Store { source, .. } => source.metric_kind(),
            Error::WrongType { .. } => "wrong_type",
            Error::HttpError(_) | Error::CatalogUnavailable(_) => "catalog_http",
            Error::CatalogIndex { .. } => "catalog_index",
            Error::SerializationError(_) => "serialization",
            Error::Cancelled(_) => "cancelled",
        }
    }
}
