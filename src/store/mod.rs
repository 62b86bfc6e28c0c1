//! Declarative resource store
//!
//! Every reconciler talks to the cluster exclusively through
//! [`ResourceStore`]. [`KubeStore`] backs it with the Kubernetes API server;
//! [`MemoryStore`] is an in-process implementation with the same optimistic
//! concurrency rules, used by the test suites.

mod kube_store;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use thiserror::Error;

use crate::controller::{ChildKind, ChildResource};
use crate::crd::{Release, ReleaseCycle};

pub use kube_store::KubeStore;
pub use memory::{MemoryStore, StoreCall};

/// Outcome taxonomy of a single store call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Resource version precondition failed
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: String, name: String },

    /// Network failure, throttling or server-side error
    #[error("transient store error: {0}")]
    Transient(String),

    /// Validation or permission failure; retrying will not help
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("unexpected object type: expected {expected}, got {actual}")]
    WrongType { expected: String, actual: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        StoreError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        StoreError::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        StoreError::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Conflicts are transient: a fresh read followed by a retry can succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_) | StoreError::Conflict { .. })
    }

    pub fn metric_kind(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "not_found",
            StoreError::AlreadyExists { .. } => "already_exists",
            StoreError::Conflict { .. } => "conflict",
            StoreError::Transient(_) => "transient",
            StoreError::Rejected(_) => "rejected",
            StoreError::WrongType { .. } => "wrong_type",
        }
    }
}

/// List/Get/Create/Update/Delete over the resources the operator reads and writes
///
/// Updates carry the object's `metadata.resourceVersion` as precondition and
/// fail with [`StoreError::Conflict`] when it is stale.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn list_releases(&self) -> StoreResult<Vec<Release>>;

    async fn get_release(&self, name: &str) -> StoreResult<Release>;

    /// Write labels and status of a Release
    async fn update_release(&self, release: &Release) -> StoreResult<Release>;

    async fn list_release_cycles(&self) -> StoreResult<Vec<ReleaseCycle>>;

    /// List children of one kind matching a label selector (`k=v[,k2=v2]`)
    async fn list_children(&self, kind: ChildKind, selector: &str)
        -> StoreResult<Vec<ChildResource>>;

    async fn create_child(&self, child: &ChildResource) -> StoreResult<()>;

    async fn update_child(&self, child: &ChildResource) -> StoreResult<()>;

    async fn delete_child(&self, kind: ChildKind, name: &str) -> StoreResult<()>;

    async fn get_config_map(&self, name: &str) -> StoreResult<ConfigMap>;
}

/// Map a kube client error onto the store taxonomy
pub(crate) fn classify_kube_error(err: kube::Error, kind: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => StoreError::not_found(kind, name),
            409 if resp.reason == "AlreadyExists" => StoreError::already_exists(kind, name),
            409 => StoreError::conflict(kind, name),
            429 | 500..=599 => StoreError::Transient(format!("{} ({})", resp.message, resp.code)),
            _ => StoreError::Rejected(format!("{} ({})", resp.message, resp.code)),
        },
        kube::Error::SerdeError(e) => StoreError::WrongType {
            expected: kind.to_string(),
            actual: e.to_string(),
        },
        other => StoreError::Transient(other.to_string()),
    }
}

/// Whether a raw kube client error is worth retrying
pub fn kube_error_is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => {
            (resp.code == 409 && resp.reason != "AlreadyExists")
                || resp.code == 429
                || resp.code >= 500
        }
        kube::Error::SerdeError(_) => false,
        _ => true,
    }
}

/// Evaluate an equality-based label selector against a label map
///
/// Supports `key=value`, `key==value`, `key!=value` and bare `key`
/// (existence) terms separated by commas. An empty selector matches
/// everything.
pub fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    let empty = BTreeMap::new();
    let labels = labels.unwrap_or(&empty);

    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| {
            if let Some((key, value)) = term.split_once("!=") {
                labels.get(key.trim()).map(String::as_str) != Some(value.trim())
            } else if let Some((key, value)) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
            {
                labels.get(key.trim()).map(String::as_str) == Some(value.trim())
            } else {
                labels.contains_key(term)
            }
        })
}
