//! Fixtures shared by the controller test modules

use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;

use crate::config::OperatorConfig;
use crate::crd::{
    AppInstallStatus, Component, Release, ReleaseCycle, ReleaseCycleSpec, ReleaseSpec,
    ReleaseState,
};
use crate::store::MemoryStore;

use super::app_install::build_app_install;
use super::child::ChildResource;

pub fn release(name: &str, state: ReleaseState, components: &[(&str, &str)]) -> Release {
    Release {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("release-system".to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: ReleaseSpec {
            parent_version: "2024.1".to_string(),
            state,
            components: components
                .iter()
                .map(|(n, v)| Component::new(n, v, "stable"))
                .collect(),
        },
        status: None,
    }
}

pub fn deleting(mut release: Release) -> Release {
    release.metadata.deletion_timestamp = Some(Time(Utc::now()));
    release
}

pub fn cycle(name: &str, release: &str) -> ReleaseCycle {
    ReleaseCycle::new(
        name,
        ReleaseCycleSpec {
            release: release.to_string(),
            activated_at: None,
        },
    )
}

/// A managed AppInstall as the reconciler would have created it
pub fn managed_install(config: &OperatorConfig, name: &str, version: &str) -> ChildResource {
    ChildResource::AppInstall(build_app_install(config, &Component::new(name, version, "stable")))
}

pub fn with_phase(child: ChildResource, phase: &str) -> ChildResource {
    match child {
        ChildResource::AppInstall(mut obj) => {
            obj.status = Some(AppInstallStatus {
                phase: Some(phase.to_string()),
                message: None,
            });
            ChildResource::AppInstall(obj)
        }
        other => other,
    }
}

pub fn store_and_config() -> (Arc<MemoryStore>, Arc<OperatorConfig>) {
    (
        Arc::new(MemoryStore::new()),
        Arc::new(OperatorConfig::default()),
    )
}

/// Sorted `name@version` keys
pub fn keys<'a>(keys: impl IntoIterator<Item = &'a crate::crd::ComponentKey>) -> Vec<String> {
    keys.into_iter().map(ToString::to_string).collect()
}
