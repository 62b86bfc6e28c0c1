//! [`ResourceStore`] backed by the Kubernetes API server

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{classify_kube_error, ResourceStore, StoreError, StoreResult};
use crate::config::OperatorConfig;
use crate::controller::config_object::MANAGED_KEYS;
use crate::controller::{ChildKind, ChildResource};
use crate::crd::{AppInstall, Application, Release, ReleaseCycle};

#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: String,
    gitops_namespace: String,
    field_manager: String,
    settings_annotation: String,
}

impl KubeStore {
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            gitops_namespace: config.gitops.namespace.clone(),
            field_manager: config.field_manager.clone(),
            settings_annotation: config.labels.settings_version_annotation.clone(),
        }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(self.field_manager.clone()),
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn namespace_for(&self, kind: ChildKind) -> &str {
        match kind {
            ChildKind::GitOpsApplication => &self.gitops_namespace,
            ChildKind::AppInstall | ChildKind::ConfigObject => &self.namespace,
        }
    }

    async fn list<K>(&self, namespace: &str, kind: &str, selector: &str) -> StoreResult<Vec<K>>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let params = if selector.is_empty() {
            ListParams::default()
        } else {
            ListParams::default().labels(selector)
        };
        self.api::<K>(namespace)
            .list(&params)
            .await
            .map(|list| list.items)
            .map_err(|e| classify_kube_error(e, kind, ""))
    }

    async fn create<K>(&self, namespace: &str, obj: &K) -> StoreResult<()>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let name = obj.name_any();
        self.api::<K>(namespace)
            .create(&self.post_params(), obj)
            .await
            .map(|_| ())
            .map_err(|e| classify_kube_error(e, &kind, &name))
    }

    async fn replace<K>(&self, namespace: &str, obj: &K) -> StoreResult<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + DeserializeOwned
            + Serialize
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let kind = K::kind(&Default::default()).to_string();
        let name = obj.name_any();
        self.api::<K>(namespace)
            .replace(&name, &self.post_params(), obj)
            .await
            .map_err(|e| classify_kube_error(e, &kind, &name))
    }
}

/// Merge patch covering only the fields the operator owns on a child
///
/// The observed resourceVersion rides along as precondition. Fields other
/// controllers or users own (Argo CD `status` and `operation`, extra spec
/// fields, unmanaged ConfigMap keys) are absent from the patch and left
/// untouched by the server.
pub(crate) fn drift_patch(
    child: &ChildResource,
    settings_annotation: &str,
) -> StoreResult<Value> {
    let resource_version = child.resource_version().ok_or_else(|| {
        StoreError::Rejected(format!(
            "{} {} has no resourceVersion to update against",
            child.kind(),
            child.name()
        ))
    })?;

    let patch = match child {
        ChildResource::AppInstall(obj) => json!({
            "metadata": { "resourceVersion": resource_version },
            "spec": {
                "catalog": obj.spec.catalog,
                "configReference": obj.spec.config_reference,
            },
        }),
        ChildResource::ConfigObject(obj) => {
            let data = obj.data.as_ref();
            let managed: Map<String, Value> = MANAGED_KEYS
                .iter()
                .map(|key| {
                    let value = data.and_then(|d| d.get(*key)).cloned();
                    (key.to_string(), json!(value))
                })
                .collect();
            json!({
                "metadata": { "resourceVersion": resource_version },
                "data": managed,
            })
        }
        ChildResource::GitOpsApplication(obj) => {
            let settings_version = obj
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(settings_annotation));
            let plugin_name = obj.spec.source.plugin.as_ref().map(|p| &p.name);
            let mut patch = json!({
                "metadata": {
                    "resourceVersion": resource_version,
                    "annotations": { settings_annotation: settings_version },
                },
                "spec": {
                    "project": obj.spec.project,
                    "destination": obj.spec.destination,
                },
            });
            if let Some(name) = plugin_name {
                patch["spec"]["source"] = json!({ "plugin": { "name": name } });
            }
            patch
        }
    };
    Ok(patch)
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list_releases(&self) -> StoreResult<Vec<Release>> {
        self.list(&self.namespace, "Release", "").await
    }

    async fn get_release(&self, name: &str) -> StoreResult<Release> {
        self.api::<Release>(&self.namespace)
            .get(name)
            .await
            .map_err(|e| classify_kube_error(e, "Release", name))
    }

    async fn update_release(&self, release: &Release) -> StoreResult<Release> {
        let name = release.name_any();
        let updated = self.replace(&self.namespace, release).await?;

        if updated.status == release.status {
            return Ok(updated);
        }

        // The status subresource ignores status in `replace`; carry the fresh
        // resource version so a concurrent write still surfaces as a conflict.
        let patch = json!({
            "metadata": { "resourceVersion": updated.resource_version() },
            "status": release.status,
        });
        debug!("Patching status of Release {}", name);
        self.api::<Release>(&self.namespace)
            .patch_status(&name, &self.patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify_kube_error(e, "Release", &name))
    }

    async fn list_release_cycles(&self) -> StoreResult<Vec<ReleaseCycle>> {
        self.list(&self.namespace, "ReleaseCycle", "").await
    }

    async fn list_children(
        &self,
        kind: ChildKind,
        selector: &str,
    ) -> StoreResult<Vec<ChildResource>> {
        let namespace = self.namespace_for(kind);
        Ok(match kind {
            ChildKind::AppInstall => self
                .list::<AppInstall>(namespace, kind.as_str(), selector)
                .await?
                .into_iter()
                .map(ChildResource::AppInstall)
                .collect(),
            ChildKind::ConfigObject => self
                .list::<ConfigMap>(namespace, kind.as_str(), selector)
                .await?
                .into_iter()
                .map(ChildResource::ConfigObject)
                .collect(),
            ChildKind::GitOpsApplication => self
                .list::<Application>(namespace, kind.as_str(), selector)
                .await?
                .into_iter()
                .map(ChildResource::GitOpsApplication)
                .collect(),
        })
    }

    async fn create_child(&self, child: &ChildResource) -> StoreResult<()> {
        let namespace = self.namespace_for(child.kind());
        match child {
            ChildResource::AppInstall(obj) => self.create(namespace, obj).await,
            ChildResource::ConfigObject(obj) => self.create(namespace, obj).await,
            ChildResource::GitOpsApplication(obj) => self.create(namespace, obj).await,
        }
    }

    async fn update_child(&self, child: &ChildResource) -> StoreResult<()> {
        let patch = drift_patch(child, &self.settings_annotation)?;
        let kind = child.kind();
        let name = child.name();
        let namespace = self.namespace_for(kind);
        let params = self.patch_params();
        let patch = Patch::Merge(&patch);

        let result = match kind {
            ChildKind::AppInstall => self
                .api::<AppInstall>(namespace)
                .patch(name, &params, &patch)
                .await
                .map(|_| ()),
            ChildKind::ConfigObject => self
                .api::<ConfigMap>(namespace)
                .patch(name, &params, &patch)
                .await
                .map(|_| ()),
            ChildKind::GitOpsApplication => self
                .api::<Application>(namespace)
                .patch(name, &params, &patch)
                .await
                .map(|_| ()),
        };
        result.map_err(|e| classify_kube_error(e, kind.as_str(), name))
    }

    async fn delete_child(&self, kind: ChildKind, name: &str) -> StoreResult<()> {
        let namespace = self.namespace_for(kind);
        let params = DeleteParams::background();
        let result = match kind {
            ChildKind::AppInstall => self
                .api::<AppInstall>(namespace)
                .delete(name, &params)
                .await
                .map(|_| ()),
            ChildKind::ConfigObject => self
                .api::<ConfigMap>(namespace)
                .delete(name, &params)
                .await
                .map(|_| ()),
            ChildKind::GitOpsApplication => self
                .api::<Application>(namespace)
                .delete(name, &params)
                .await
                .map(|_| ()),
        };
        result.map_err(|e| classify_kube_error(e, kind.as_str(), name))
    }

    async fn get_config_map(&self, name: &str) -> StoreResult<ConfigMap> {
        self.api::<ConfigMap>(&self.namespace)
            .get(name)
            .await
            .map_err(|e| classify_kube_error(e, "ConfigMap", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::app_install::build_app_install;
    use crate::controller::config_object::build_config_object;
    use crate::controller::gitops::build_application;
    use crate::controller::PassInputs;
    use crate::crd::{Component, SyncPolicy};

    fn observed(mut child: ChildResource) -> ChildResource {
        let meta = match &mut child {
            ChildResource::AppInstall(obj) => &mut obj.metadata,
            ChildResource::ConfigObject(obj) => &mut obj.metadata,
            ChildResource::GitOpsApplication(obj) => &mut obj.metadata,
        };
        meta.resource_version = Some("42".to_string());
        child
    }

    #[test]
    fn test_application_patch_leaves_argo_fields_alone() {
        let config = OperatorConfig::default();
        let component = Component::new("redis", "7.2", "stable");
        let mut app = build_application(&config, &component, &PassInputs::default());
        app.spec.sync_policy = Some(SyncPolicy::default());
        app.spec.source.repo_url = "https://charts.example.com".to_string();
        let child = observed(ChildResource::GitOpsApplication(app));

        let patch = drift_patch(&child, &config.labels.settings_version_annotation).unwrap();

        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["spec"]["project"], config.gitops.project.as_str());
        let plugin = &patch["spec"]["source"]["plugin"];
        assert_eq!(plugin["name"], config.gitops.plugin_name.as_str());
        // No settings version known: the annotation is cleared
        assert!(
            patch["metadata"]["annotations"][config.labels.settings_version_annotation.as_str()]
                .is_null()
        );
        let spec = patch["spec"].as_object().unwrap();
        assert!(!spec.contains_key("syncPolicy"));
        assert!(patch.get("status").is_none());
        assert!(patch.get("operation").is_none());
        let source = spec["source"].as_object().unwrap();
        assert_eq!(source.len(), 1);
        assert!(!source["plugin"].as_object().unwrap().contains_key("env"));
    }

    #[test]
    fn test_application_patch_carries_settings_version() {
        let config = OperatorConfig::default();
        let component = Component::new("redis", "7.2", "stable");
        let inputs = PassInputs {
            settings_version: Some("1234".to_string()),
        };
        let app = build_application(&config, &component, &inputs);
        let child = observed(ChildResource::GitOpsApplication(app));

        let annotation = config.labels.settings_version_annotation.as_str();
        let patch = drift_patch(&child, annotation).unwrap();

        assert_eq!(patch["metadata"]["annotations"][annotation], "1234");
    }

    #[test]
    fn test_config_object_patch_covers_managed_keys_only() {
        let config = OperatorConfig::default();
        let component = Component::new("redis", "7.2", "stable").with_config_reference("cfg");
        let mut cm = build_config_object(&config, &component);
        cm.data
            .get_or_insert_with(Default::default)
            .insert("user-key".to_string(), "kept".to_string());
        let child = observed(ChildResource::ConfigObject(cm));

        let patch = drift_patch(&child, "unused").unwrap();

        let data = patch["data"].as_object().unwrap();
        let mut keys: Vec<_> = data.keys().map(String::as_str).collect();
        keys.sort_unstable();
        let mut managed = MANAGED_KEYS.to_vec();
        managed.sort_unstable();
        assert_eq!(keys, managed);
        assert!(patch.get("spec").is_none());
    }

    #[test]
    fn test_app_install_patch_clears_config_reference() {
        let config = OperatorConfig::default();
        let install = build_app_install(&config, &Component::new("redis", "7.2", "stable"));
        let child = observed(ChildResource::AppInstall(install));

        let patch = drift_patch(&child, "unused").unwrap();

        assert_eq!(patch["spec"]["catalog"], "stable");
        assert!(patch["spec"]["configReference"].is_null());
        assert!(patch["spec"].get("component").is_none());
        assert!(patch.get("status").is_none());
    }

    #[test]
    fn test_patch_requires_observed_resource_version() {
        let config = OperatorConfig::default();
        let install = build_app_install(&config, &Component::new("redis", "7.2", "stable"));

        let err = drift_patch(&ChildResource::AppInstall(install), "unused").unwrap_err();

        assert!(matches!(err, StoreError::Rejected(_)));
    }
}
