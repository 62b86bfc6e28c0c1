//! Child resources materialized per desired component
//!
//! [`ChildResource`] is a closed set: every kind the operator manages is a
//! variant, so code dispatching on kind is checked for exhaustiveness.

use std::fmt;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::crd::{AppInstall, Application};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    AppInstall,
    ConfigObject,
    GitOpsApplication,
}

impl ChildKind {
    /// Kubernetes kind of the backing object
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::AppInstall => "AppInstall",
            ChildKind::ConfigObject => "ConfigMap",
            ChildKind::GitOpsApplication => "Application",
        }
    }

    /// Name used in logs and metrics for the reconciler of this kind
    pub fn controller_name(&self) -> &'static str {
        match self {
            ChildKind::AppInstall => "appinstall",
            ChildKind::ConfigObject => "configobject",
            ChildKind::GitOpsApplication => "gitops",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ChildResource {
    AppInstall(AppInstall),
    ConfigObject(ConfigMap),
    GitOpsApplication(Application),
}

impl ChildResource {
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildResource::AppInstall(_) => ChildKind::AppInstall,
            ChildResource::ConfigObject(_) => ChildKind::ConfigObject,
            ChildResource::GitOpsApplication(_) => ChildKind::GitOpsApplication,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            ChildResource::AppInstall(o) => &o.metadata,
            ChildResource::ConfigObject(o) => &o.metadata,
            ChildResource::GitOpsApplication(o) => &o.metadata,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ChildResource::AppInstall(o) => &mut o.metadata,
            ChildResource::ConfigObject(o) => &mut o.metadata,
            ChildResource::GitOpsApplication(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.meta().resource_version.as_deref()
    }

    pub fn is_being_deleted(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// Fail with `WrongType` unless this object is of `expected` kind
    pub fn ensure_kind(&self, expected: ChildKind) -> Result<()> {
        if self.kind() == expected {
            Ok(())
        } else {
            Err(Error::WrongType {
                expected: expected.to_string(),
                actual: format!("{}/{}", self.kind(), self.name()),
            })
        }
    }

    pub fn as_app_install(&self) -> Result<&AppInstall> {
        match self {
            ChildResource::AppInstall(o) => Ok(o),
            other => Err(Error::WrongType {
                expected: ChildKind::AppInstall.to_string(),
                actual: other.kind().to_string(),
            }),
        }
    }
}
