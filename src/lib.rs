//! release-operator: Kubernetes operator for platform Releases
//!
//! A Release names a set of versioned components. The operator keeps the
//! cluster's AppInstalls, ConfigMaps and GitOps Applications in step with
//! the union of components wanted by the active Releases, and reports each
//! Release's lifecycle phase and deployment status.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod store;

pub use crate::error::{Error, Result};
