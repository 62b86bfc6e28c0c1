//! Catalog index lookup
//!
//! Resolves the configuration version of a component from the catalog's
//! Helm-style `index.yaml`. The version is published as an annotation on the
//! matching index entry. A missing catalog, component, version or annotation
//! is a normal outcome (`Ok(None)`), not an error.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::OperatorConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Config version published for `component@version` in `catalog`
    async fn config_version(
        &self,
        catalog: &str,
        component: &str,
        version: &str,
    ) -> Result<Option<String>>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogIndex {
    #[serde(default)]
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    version: String,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

impl CatalogIndex {
    fn annotation(&self, component: &str, version: &str, key: &str) -> Option<&str> {
        self.entries
            .get(component)?
            .iter()
            .find(|e| e.version == version)?
            .annotations
            .get(key)
            .map(String::as_str)
    }
}

/// [`CatalogLookup`] over HTTP: `GET <baseUrl>/<catalog>/index.yaml`
pub struct HttpCatalogIndex {
    client: Client,
    base_url: String,
    annotation: String,
}

impl HttpCatalogIndex {
    pub fn new(config: &OperatorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.catalog_timeout())
            .user_agent(concat!("release-operator/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(Error::HttpError)?;

        Ok(Self {
            client,
            base_url: config.catalog.base_url.trim_end_matches('/').to_string(),
            annotation: config.labels.config_version_annotation.clone(),
        })
    }

    fn index_url(&self, catalog: &str) -> String {
        format!("{}/{}/index.yaml", self.base_url, catalog)
    }
}

#[async_trait]
impl CatalogLookup for HttpCatalogIndex {
    async fn config_version(
        &self,
        catalog: &str,
        component: &str,
        version: &str,
    ) -> Result<Option<String>> {
        let url = self.index_url(catalog);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!("Catalog index {} not found", url);
            return Ok(None);
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::CatalogUnavailable(format!("{url} returned {status}")));
        }
        if !status.is_success() {
            return Err(Error::CatalogIndex {
                url,
                message: format!("unexpected status {status}"),
            });
        }

        let body = response.text().await?;
        let index: CatalogIndex = serde_yaml::from_str(&body).map_err(|e| Error::CatalogIndex {
            url: url.clone(),
            message: e.to_string(),
        })?;

        let found = index
            .annotation(component, version, &self.annotation)
            .map(str::to_string);
        if found.is_none() {
            debug!(
                "No {} annotation for {}@{} in {}",
                self.annotation, component, version, url
            );
        }
        Ok(found)
    }
}
