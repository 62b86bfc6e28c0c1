//! ConfigObject reconciler: one ConfigMap per component declaring a
//! `configReference`, recording where its configuration comes from

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;

use crate::config::OperatorConfig;
use crate::crd::Component;
use crate::error::Result;
use crate::store::ResourceStore;

use super::child::{ChildKind, ChildResource};
use super::identity::{
    derived_name_for, CONFIG_KEY_CATALOG, CONFIG_KEY_COMPONENT, CONFIG_KEY_REFERENCE,
    CONFIG_KEY_VERSION,
};
use super::reconciler::{ChildHandler, ChildReconciler, PassInputs};

/// Data keys owned by the operator; any other key is left to users
pub const MANAGED_KEYS: [&str; 4] = [
    CONFIG_KEY_COMPONENT,
    CONFIG_KEY_VERSION,
    CONFIG_KEY_CATALOG,
    CONFIG_KEY_REFERENCE,
];

fn component_data(component: &Component) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CONFIG_KEY_COMPONENT.to_string(), component.name.clone()),
        (CONFIG_KEY_VERSION.to_string(), component.version.clone()),
        (CONFIG_KEY_CATALOG.to_string(), component.catalog.clone()),
        (
            CONFIG_KEY_REFERENCE.to_string(),
            component.config_reference.clone().unwrap_or_default(),
        ),
    ])
}

pub fn build_config_object(config: &OperatorConfig, component: &Component) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(derived_name_for(component)),
            namespace: Some(config.namespace.clone()),
            labels: Some(config.managed_labels(&component.name, &component.version)),
            ..Default::default()
        },
        data: Some(component_data(component)),
        ..Default::default()
    }
}

pub struct ConfigObjectHandler {
    config: Arc<OperatorConfig>,
}

impl ConfigObjectHandler {
    pub fn new(config: Arc<OperatorConfig>) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl ChildHandler for ConfigObjectHandler {
    fn kind(&self) -> ChildKind {
        ChildKind::ConfigObject
    }

    fn wants(&self, component: &Component) -> bool {
        component
            .config_reference
            .as_deref()
            .is_some_and(|r| !r.is_empty())
    }

    fn desired(&self, component: &Component, _inputs: &PassInputs) -> ChildResource {
        ChildResource::ConfigObject(build_config_object(&self.config, component))
    }

    fn drift(&self, desired: &ChildResource, observed: &ChildResource) -> Option<ChildResource> {
        let (ChildResource::ConfigObject(want), ChildResource::ConfigObject(have)) =
            (desired, observed)
        else {
            return None;
        };
        let empty = BTreeMap::new();
        let want_data = want.data.as_ref().unwrap_or(&empty);
        let have_data = have.data.as_ref().unwrap_or(&empty);

        if MANAGED_KEYS
            .iter()
            .all(|key| want_data.get(*key) == have_data.get(*key))
        {
            return None;
        }

        // Keys not managed here are left as found.
        let mut refreshed = have.clone();
        let data = refreshed.data.get_or_insert_with(BTreeMap::new);
        for key in MANAGED_KEYS {
            match want_data.get(key) {
                Some(value) => data.insert(key.to_string(), value.clone()),
                None => data.remove(key),
            };
        }
        Some(ChildResource::ConfigObject(refreshed))
    }
}

pub type ConfigObjectReconciler = ChildReconciler<ConfigObjectHandler>;

pub fn reconciler(
    store: Arc<dyn ResourceStore>,
    config: Arc<OperatorConfig>,
) -> Result<ConfigObjectReconciler> {
    ChildReconciler::new(store, config.clone(), ConfigObjectHandler::new(config))
}
