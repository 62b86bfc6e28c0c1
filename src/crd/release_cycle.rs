//! ReleaseCycle Custom Resource Definition
//!
//! A ReleaseCycle activates a Release for its support cycle. Its presence
//! moves the Release's cycle phase from `Upcoming` to `Enabled`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "release.platform.io",
    version = "v1alpha1",
    kind = "ReleaseCycle",
    namespaced,
    shortname = "rcy",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Release","type":"string","jsonPath":".spec.release"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseCycleSpec {
    /// Name of the Release this cycle activates
    pub release: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<String>,
}
