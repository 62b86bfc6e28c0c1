//! AppInstall Custom Resource Definition
//!
//! One AppInstall exists per desired component. An external installer
//! acts on it and reports progress in `status.phase`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Phase reported by the installer when an install did not succeed
pub const APP_INSTALL_PHASE_FAILED: &str = "Failed";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "release.platform.io",
    version = "v1alpha1",
    kind = "AppInstall",
    namespaced,
    status = "AppInstallStatus",
    shortname = "ai",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Component","type":"string","jsonPath":".spec.component"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppInstallSpec {
    pub component: String,
    pub version: String,
    pub catalog: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_reference: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppInstallStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AppInstall {
    pub fn has_failed(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(|p| p == APP_INSTALL_PHASE_FAILED)
            .unwrap_or(false)
    }
}
