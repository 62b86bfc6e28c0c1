//! Identity matching between desired and observed child resources
//!
//! A desired child is satisfied by an observed one only when the derived
//! name agrees *and* the kind-specific identity fields agree. An object
//! with the right name but stale or corrupted identity fields is not a
//! match: it is retired and recreated.

use crate::crd::gitops::{ENV_COMPONENT_CATALOG, ENV_COMPONENT_NAME, ENV_COMPONENT_VERSION};
use crate::crd::Component;

use super::child::ChildResource;

/// ConfigMap data keys identifying the component a config object belongs to
pub const CONFIG_KEY_COMPONENT: &str = "component";
pub const CONFIG_KEY_VERSION: &str = "version";
pub const CONFIG_KEY_CATALOG: &str = "catalog";
pub const CONFIG_KEY_REFERENCE: &str = "configReference";

/// Deterministic child name for a component: `<name>.<version>`
pub fn derived_name(name: &str, version: &str) -> String {
    format!("{name}.{version}")
}

pub fn derived_name_for(component: &Component) -> String {
    derived_name(&component.name, &component.version)
}

/// Both sides present, non-empty and equal
fn same_value(desired: Option<&str>, observed: Option<&str>) -> bool {
    match (desired, observed) {
        (Some(d), Some(o)) => !d.is_empty() && d == o,
        _ => false,
    }
}

/// Whether `observed` already materializes `desired`
pub fn matches(desired: &ChildResource, observed: &ChildResource) -> bool {
    if desired.name().is_empty() || desired.name() != observed.name() {
        return false;
    }

    match (desired, observed) {
        (ChildResource::AppInstall(want), ChildResource::AppInstall(have)) => {
            same_value(Some(&want.spec.component), Some(&have.spec.component))
                && same_value(Some(&want.spec.version), Some(&have.spec.version))
        }
        (ChildResource::ConfigObject(want), ChildResource::ConfigObject(have)) => {
            let value = |cm: &k8s_openapi::api::core::v1::ConfigMap, key: &str| {
                cm.data.as_ref().and_then(|d| d.get(key)).cloned()
            };
            [CONFIG_KEY_COMPONENT, CONFIG_KEY_VERSION].iter().all(|key| {
                same_value(value(want, key).as_deref(), value(have, key).as_deref())
            })
        }
        (ChildResource::GitOpsApplication(want), ChildResource::GitOpsApplication(have)) => [
            ENV_COMPONENT_NAME,
            ENV_COMPONENT_VERSION,
            ENV_COMPONENT_CATALOG,
        ]
        .iter()
        .all(|key| same_value(want.plugin_env(key), have.plugin_env(key))),
        _ => false,
    }
}
