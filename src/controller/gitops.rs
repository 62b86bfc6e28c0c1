//! GitOps reconciler: one Argo CD Application per desired component
//!
//! Applications point at `<catalog.baseUrl>/<catalog>` and hand the
//! component identity to the configured plugin through environment values.
//! When a settings ConfigMap is configured, its resource version is stamped
//! as an annotation; a change of that version refreshes every Application.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::ObjectMeta;
use tracing::debug;

use crate::config::OperatorConfig;
use crate::crd::gitops::{
    ENV_COMPONENT_CATALOG, ENV_COMPONENT_NAME, ENV_COMPONENT_VERSION, ENV_CONFIG_VERSION,
};
use crate::crd::{
    Application, ApplicationDestination, ApplicationSource, ApplicationSpec, AutomatedSync,
    Component, PluginEnv, PluginSource, SyncPolicy,
};
use crate::error::{Error, Result};
use crate::store::ResourceStore;

use super::catalog_index::CatalogLookup;
use super::child::{ChildKind, ChildResource};
use super::identity::derived_name_for;
use super::reconciler::{ChildHandler, ChildReconciler, PassInputs};

pub fn build_application(
    config: &OperatorConfig,
    component: &Component,
    inputs: &PassInputs,
) -> Application {
    let annotations = inputs.settings_version.as_ref().map(|version| {
        BTreeMap::from([(
            config.labels.settings_version_annotation.clone(),
            version.clone(),
        )])
    });

    let env = [
        (ENV_COMPONENT_NAME, &component.name),
        (ENV_COMPONENT_VERSION, &component.version),
        (ENV_COMPONENT_CATALOG, &component.catalog),
    ]
    .into_iter()
    .map(|(name, value)| PluginEnv {
        name: name.to_string(),
        value: value.clone(),
    })
    .collect();

    Application {
        metadata: ObjectMeta {
            name: Some(derived_name_for(component)),
            namespace: Some(config.gitops.namespace.clone()),
            labels: Some(config.managed_labels(&component.name, &component.version)),
            annotations,
            ..Default::default()
        },
        spec: ApplicationSpec {
            project: config.gitops.project.clone(),
            source: ApplicationSource {
                repo_url: config.catalog_repo_url(&component.catalog),
                target_revision: component.version.clone(),
                chart: Some(component.name.clone()),
                plugin: Some(PluginSource {
                    name: config.gitops.plugin_name.clone(),
                    env,
                }),
            },
            destination: ApplicationDestination {
                server: config.gitops.destination_server.clone(),
                namespace: config.gitops.destination_namespace.clone(),
            },
            sync_policy: config.gitops.automated_sync.then(|| SyncPolicy {
                automated: Some(AutomatedSync {
                    prune: true,
                    self_heal: true,
                }),
            }),
        },
    }
}

pub struct GitOpsHandler {
    config: Arc<OperatorConfig>,
    catalog: Arc<dyn CatalogLookup>,
}

impl GitOpsHandler {
    pub fn new(config: Arc<OperatorConfig>, catalog: Arc<dyn CatalogLookup>) -> Self {
        Self { config, catalog }
    }

    fn settings_version<'a>(&self, app: &'a Application) -> Option<&'a str> {
        app.metadata
            .annotations
            .as_ref()?
            .get(&self.config.labels.settings_version_annotation)
            .map(String::as_str)
    }
}

#[async_trait::async_trait]
impl ChildHandler for GitOpsHandler {
    fn kind(&self) -> ChildKind {
        ChildKind::GitOpsApplication
    }

    async fn observe_inputs(&self, store: &dyn ResourceStore) -> Result<PassInputs> {
        let Some(name) = self.config.gitops.settings_config_map.as_deref() else {
            return Ok(PassInputs::default());
        };

        match store.get_config_map(name).await {
            Ok(cm) => Ok(PassInputs {
                settings_version: cm.metadata.resource_version,
            }),
            Err(e) if e.is_not_found() => {
                debug!("GitOps settings ConfigMap {} not found", name);
                Ok(PassInputs::default())
            }
            Err(e) => Err(Error::store(format!("get ConfigMap/{name}"), e)),
        }
    }

    fn desired(&self, component: &Component, inputs: &PassInputs) -> ChildResource {
        ChildResource::GitOpsApplication(build_application(&self.config, component, inputs))
    }

    async fn complete(&self, child: ChildResource, component: &Component) -> Result<ChildResource> {
        let mut app = match child {
            ChildResource::GitOpsApplication(app) => app,
            other => return Ok(other),
        };

        let config_version = self
            .catalog
            .config_version(&component.catalog, &component.name, &component.version)
            .await?;
        if let (Some(version), Some(plugin)) = (config_version, app.spec.source.plugin.as_mut()) {
            plugin.set_env(ENV_CONFIG_VERSION, &version);
        }
        Ok(ChildResource::GitOpsApplication(app))
    }

    fn drift(&self, desired: &ChildResource, observed: &ChildResource) -> Option<ChildResource> {
        let (ChildResource::GitOpsApplication(want), ChildResource::GitOpsApplication(have)) =
            (desired, observed)
        else {
            return None;
        };

        let settings_drift = self.settings_version(want) != self.settings_version(have);
        let plugin_name = |app: &Application| {
            app.spec
                .source
                .plugin
                .as_ref()
                .map(|p| p.name.clone())
        };
        let spec_drift = want.spec.project != have.spec.project
            || want.spec.destination != have.spec.destination
            || plugin_name(want) != plugin_name(have);

        if !settings_drift && !spec_drift {
            return None;
        }

        let mut refreshed = have.clone();
        let key = &self.config.labels.settings_version_annotation;
        match self.settings_version(want) {
            Some(version) => {
                refreshed
                    .metadata
                    .annotations
                    .get_or_insert_with(BTreeMap::new)
                    .insert(key.clone(), version.to_string());
            }
            None => {
                if let Some(annotations) = refreshed.metadata.annotations.as_mut() {
                    annotations.remove(key);
                }
            }
        }
        refreshed.spec.project = want.spec.project.clone();
        refreshed.spec.destination = want.spec.destination.clone();
        if let (Some(name), Some(plugin)) =
            (plugin_name(want), refreshed.spec.source.plugin.as_mut())
        {
            plugin.name = name;
        }
        Some(ChildResource::GitOpsApplication(refreshed))
    }
}

pub type GitOpsReconciler = ChildReconciler<GitOpsHandler>;

pub fn reconciler(
    store: Arc<dyn ResourceStore>,
    config: Arc<OperatorConfig>,
    catalog: Arc<dyn CatalogLookup>,
) -> Result<GitOpsReconciler> {
    ChildReconciler::new(store, config.clone(), GitOpsHandler::new(config, catalog))
}
