//! Release Custom Resource Definition
//!
//! A Release is a named, versioned bundle of components with a lifecycle
//! state. Releases are authored outside the operator; the operator only
//! writes the derived `deployed` flag, the `Ready` condition and the
//! cycle-phase label back onto them.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, SpecValidationError};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "release.platform.io",
    version = "v1alpha1",
    kind = "Release",
    namespaced,
    status = "ReleaseStatus",
    shortname = "rel",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Parent","type":"string","jsonPath":".spec.parentVersion"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".spec.state"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".metadata.labels.release\\.platform\\.io/cycle-phase"}"#,
    printcolumn = r#"{"name":"Deployed","type":"boolean","jsonPath":".status.deployed"}"#,
    printcolumn = r#"{"name":"InUse","type":"boolean","jsonPath":".status.inUse"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseSpec {
    pub parent_version: String,

    #[serde(default)]
    pub state: ReleaseState,

    /// Components in declaration order
    #[serde(default)]
    pub components: Vec<Component>,
}

/// Lifecycle state of a Release
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReleaseState {
    #[default]
    #[serde(rename = "WIP")]
    Wip,
    Active,
    Deprecated,
    #[serde(rename = "EOL")]
    Eol,
}

impl fmt::Display for ReleaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseState::Wip => write!(f, "WIP"),
            ReleaseState::Active => write!(f, "Active"),
            ReleaseState::Deprecated => write!(f, "Deprecated"),
            ReleaseState::Eol => write!(f, "EOL"),
        }
    }
}

/// One named, versioned software unit within a Release
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    pub version: String,
    /// Source repository identifier
    pub catalog: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_reference: Option<String>,
}

/// Logical identity of a component: two components with the same name and
/// version are the same component regardless of which Release lists them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentKey {
    pub name: String,
    pub version: String,
}

impl fmt::Display for ComponentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

impl Component {
    pub fn new(name: &str, version: &str, catalog: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            catalog: catalog.to_string(),
            config_reference: None,
        }
    }

    pub fn with_config_reference(mut self, reference: &str) -> Self {
        self.config_reference = Some(reference.to_string());
        self
    }

    pub fn key(&self) -> ComponentKey {
        ComponentKey {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }

    /// A component without a name or version can never be materialized
    pub fn is_valid(&self) -> bool {
        !self.name.trim().is_empty() && !self.version.trim().is_empty()
    }
}

/// Status written back by the lifecycle projector
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    /// True once every component has a successfully created install
    #[serde(default)]
    pub deployed: bool,

    /// Set by an external collaborator when live workloads reference this Release
    #[serde(default)]
    pub in_use: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ReleaseSpec {
    /// Validate the component list
    ///
    /// Reports components without name or version and duplicate component
    /// keys within one Release. Invalid components are skipped by the
    /// extractor; these errors are surfaced as warnings only.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors = Vec::new();
        let mut seen = std::collections::BTreeSet::new();

        for (i, component) in self.components.iter().enumerate() {
            if component.name.trim().is_empty() {
                errors.push(SpecValidationError::new(
                    format!("spec.components[{i}].name"),
                    "component name must not be empty",
                    "Set the component name to the chart or package name",
                ));
            }
            if component.version.trim().is_empty() {
                errors.push(SpecValidationError::new(
                    format!("spec.components[{i}].version"),
                    "component version must not be empty",
                    "Pin the component to an explicit version",
                ));
            }
            if component.is_valid() && !seen.insert(component.key()) {
                errors.push(SpecValidationError::new(
                    format!("spec.components[{i}]"),
                    format!("component {} is listed more than once", component.key()),
                    "Remove the duplicate entry",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

impl Release {
    /// Deletion has been requested once the API server sets a deletion timestamp
    pub fn deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Eligible Releases contribute their components directly to the desired set
    pub fn is_eligible(&self) -> bool {
        self.spec.state != ReleaseState::Eol && !self.deletion_requested()
    }

    pub fn in_use(&self) -> bool {
        self.status.as_ref().map(|s| s.in_use).unwrap_or(false)
    }
}
