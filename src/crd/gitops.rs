//! Argo CD `Application` (subset)
//!
//! The operator does not own this CRD; it only creates and deletes
//! Applications labeled as managed by it. Only the fields the operator
//! writes are modelled, unknown fields are ignored on read.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Plugin environment keys injected into every managed Application
pub const ENV_COMPONENT_NAME: &str = "COMPONENT_NAME";
pub const ENV_COMPONENT_VERSION: &str = "COMPONENT_VERSION";
pub const ENV_COMPONENT_CATALOG: &str = "COMPONENT_CATALOG";
pub const ENV_CONFIG_VERSION: &str = "CONFIG_VERSION";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "Application",
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    pub project: String,
    pub source: ApplicationSource,
    pub destination: ApplicationDestination,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<SyncPolicy>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub target_revision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginSource>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PluginSource {
    pub name: String,
    #[serde(default)]
    pub env: Vec<PluginEnv>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PluginEnv {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ApplicationDestination {
    pub server: String,
    pub namespace: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automated: Option<AutomatedSync>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedSync {
    #[serde(default)]
    pub prune: bool,
    #[serde(default)]
    pub self_heal: bool,
}

impl Application {
    /// Value of a plugin environment entry, if present
    pub fn plugin_env(&self, name: &str) -> Option<&str> {
        self.spec
            .source
            .plugin
            .as_ref()?
            .env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}

impl PluginSource {
    /// Set or replace a plugin environment entry
    pub fn set_env(&mut self, name: &str, value: &str) {
        match self.env.iter_mut().find(|e| e.name == name) {
            Some(entry) => entry.value = value.to_string(),
            None => self.env.push(PluginEnv {
                name: name.to_string(),
                value: value.to_string(),
            }),
        }
    }
}
