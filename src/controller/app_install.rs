//! AppInstall reconciler: one AppInstall per desired component

use std::sync::Arc;

use kube::api::ObjectMeta;

use crate::config::OperatorConfig;
use crate::crd::{AppInstall, AppInstallSpec, Component};
use crate::error::Result;
use crate::store::ResourceStore;

use super::child::{ChildKind, ChildResource};
use super::identity::derived_name_for;
use super::reconciler::{ChildHandler, ChildReconciler, PassInputs};

pub fn build_app_install(config: &OperatorConfig, component: &Component) -> AppInstall {
    AppInstall {
        metadata: ObjectMeta {
            name: Some(derived_name_for(component)),
            namespace: Some(config.namespace.clone()),
            labels: Some(config.managed_labels(&component.name, &component.version)),
            ..Default::default()
        },
        spec: AppInstallSpec {
            component: component.name.clone(),
            version: component.version.clone(),
            catalog: component.catalog.clone(),
            config_reference: component.config_reference.clone(),
        },
        status: None,
    }
}

pub struct AppInstallHandler {
    config: Arc<OperatorConfig>,
}

impl AppInstallHandler {
    pub fn new(config: Arc<OperatorConfig>) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl ChildHandler for AppInstallHandler {
    fn kind(&self) -> ChildKind {
        ChildKind::AppInstall
    }

    fn desired(&self, component: &Component, _inputs: &PassInputs) -> ChildResource {
        ChildResource::AppInstall(build_app_install(&self.config, component))
    }

    fn drift(&self, desired: &ChildResource, observed: &ChildResource) -> Option<ChildResource> {
        let (ChildResource::AppInstall(want), ChildResource::AppInstall(have)) = (desired, observed)
        else {
            return None;
        };
        if want.spec.catalog == have.spec.catalog
            && want.spec.config_reference == have.spec.config_reference
        {
            return None;
        }

        let mut refreshed = have.clone();
        refreshed.spec.catalog = want.spec.catalog.clone();
        refreshed.spec.config_reference = want.spec.config_reference.clone();
        Some(ChildResource::AppInstall(refreshed))
    }
}

pub type AppInstallReconciler = ChildReconciler<AppInstallHandler>;

pub fn reconciler(
    store: Arc<dyn ResourceStore>,
    config: Arc<OperatorConfig>,
) -> Result<AppInstallReconciler> {
    ChildReconciler::new(store, config.clone(), AppInstallHandler::new(config))
}
