//! Operator configuration
//!
//! All label keys, names and endpoints the reconcilers use live in one
//! immutable [`OperatorConfig`], built once at startup (TOML file plus CLI
//! overrides) and handed to every reconciler at construction.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::RetryPolicy;
use crate::error::{Error, Result};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct OperatorConfig {
    /// Namespace holding Releases, ReleaseCycles, AppInstalls and ConfigMaps
    pub namespace: String,
    /// Field manager recorded on writes
    pub field_manager: String,
    pub labels: LabelConfig,
    pub gitops: GitOpsConfig,
    pub catalog: CatalogConfig,
    pub retry: RetryPolicy,
    pub resync_interval_secs: u64,
    pub pass_timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelConfig {
    pub managed_by_key: String,
    pub managed_by_value: String,
    pub component_key: String,
    pub component_version_key: String,
    pub cycle_phase_key: String,
    /// Catalog index annotation carrying a component's config version
    pub config_version_annotation: String,
    /// Annotation recording the GitOps settings ConfigMap resource version
    pub settings_version_annotation: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GitOpsConfig {
    /// Namespace Argo CD watches for Applications
    pub namespace: String,
    pub project: String,
    pub destination_server: String,
    pub destination_namespace: String,
    pub plugin_name: String,
    /// Optional ConfigMap whose changes force a refresh of every Application
    pub settings_config_map: Option<String>,
    pub automated_sync: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct CatalogConfig {
    /// Base URL; a catalog's repository is `<baseUrl>/<catalog>`
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "release-system".to_string(),
            field_manager: "release-operator".to_string(),
            labels: LabelConfig::default(),
            gitops: GitOpsConfig::default(),
            catalog: CatalogConfig::default(),
            retry: RetryPolicy::default(),
            resync_interval_secs: 300,
            pass_timeout_secs: 120,
        }
    }
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            managed_by_key: "app.kubernetes.io/managed-by".to_string(),
            managed_by_value: "release-operator".to_string(),
            component_key: "release.platform.io/component".to_string(),
            component_version_key: "release.platform.io/component-version".to_string(),
            cycle_phase_key: "release.platform.io/cycle-phase".to_string(),
            config_version_annotation: "release.platform.io/config-version".to_string(),
            settings_version_annotation: "release.platform.io/settings-version".to_string(),
        }
    }
}

impl Default for GitOpsConfig {
    fn default() -> Self {
        Self {
            namespace: "argocd".to_string(),
            project: "default".to_string(),
            destination_server: "https://kubernetes.default.svc".to_string(),
            destination_namespace: "apps".to_string(),
            plugin_name: "release-plugin".to_string(),
            settings_config_map: None,
            automated_sync: true,
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://charts.example.io".to_string(),
            timeout_secs: 10,
        }
    }
}

impl OperatorConfig {
    /// Parse a TOML document; missing fields take their defaults
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::ConfigError(format!("invalid config file: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Reject configurations the reconcilers cannot run with
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("namespace", &self.namespace),
            ("fieldManager", &self.field_manager),
            ("labels.managedByKey", &self.labels.managed_by_key),
            ("labels.managedByValue", &self.labels.managed_by_value),
            ("labels.componentKey", &self.labels.component_key),
            ("labels.componentVersionKey", &self.labels.component_version_key),
            ("labels.cyclePhaseKey", &self.labels.cycle_phase_key),
            ("labels.configVersionAnnotation", &self.labels.config_version_annotation),
            ("labels.settingsVersionAnnotation", &self.labels.settings_version_annotation),
            ("gitops.namespace", &self.gitops.namespace),
            ("gitops.project", &self.gitops.project),
            ("gitops.destinationServer", &self.gitops.destination_server),
            ("gitops.destinationNamespace", &self.gitops.destination_namespace),
            ("gitops.pluginName", &self.gitops.plugin_name),
            ("catalog.baseUrl", &self.catalog.base_url),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::ConfigError(format!("{field} must not be empty")));
            }
        }

        if !(self.catalog.base_url.starts_with("http://")
            || self.catalog.base_url.starts_with("https://"))
        {
            return Err(Error::ConfigError(format!(
                "catalog.baseUrl must be an http(s) URL, got {}",
                self.catalog.base_url
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::ConfigError(
                "retry.maxAttempts must be at least 1".to_string(),
            ));
        }

        if self.resync_interval_secs == 0 || self.pass_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "resyncIntervalSecs and passTimeoutSecs must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Label selector restricting reads to objects this operator manages
    pub fn managed_selector(&self) -> String {
        format!(
            "{}={}",
            self.labels.managed_by_key, self.labels.managed_by_value
        )
    }

    /// Labels stamped on every managed child resource
    pub fn managed_labels(&self, component: &str, version: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(
            self.labels.managed_by_key.clone(),
            self.labels.managed_by_value.clone(),
        );
        labels.insert(self.labels.component_key.clone(), component.to_string());
        labels.insert(
            self.labels.component_version_key.clone(),
            version.to_string(),
        );
        labels
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn pass_timeout(&self) -> Duration {
        Duration::from_secs(self.pass_timeout_secs)
    }

    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog.timeout_secs.max(1))
    }

    /// Repository URL for a catalog
    pub fn catalog_repo_url(&self, catalog: &str) -> String {
        format!("{}/{}", self.catalog.base_url.trim_end_matches('/'), catalog)
    }
}
