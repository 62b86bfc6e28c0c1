//! In-memory resource store
//!
//! Mirrors the API server semantics the reconcilers depend on: resource
//! versions bumped on every write, `Conflict` on stale updates,
//! `AlreadyExists`/`NotFound` on create/delete races and label selection.
//! Every call is recorded, and one-shot faults can be injected per call.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use super::{selector_matches, ResourceStore, StoreError, StoreResult};
use crate::controller::{ChildKind, ChildResource};
use crate::crd::{Release, ReleaseCycle};

/// A store call as observed by [`MemoryStore`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreCall {
    ListReleases,
    GetRelease(String),
    UpdateRelease(String),
    ListReleaseCycles,
    ListChildren(ChildKind),
    CreateChild(ChildKind, String),
    UpdateChild(ChildKind, String),
    DeleteChild(ChildKind, String),
    GetConfigMap(String),
}

impl StoreCall {
    /// Create, update or delete of any object
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            StoreCall::UpdateRelease(_)
                | StoreCall::CreateChild(..)
                | StoreCall::UpdateChild(..)
                | StoreCall::DeleteChild(..)
        )
    }
}

type FaultMatcher = Box<dyn Fn(&StoreCall) -> bool + Send>;

#[derive(Default)]
struct State {
    releases: BTreeMap<String, Release>,
    cycles: BTreeMap<String, ReleaseCycle>,
    children: BTreeMap<(ChildKind, String), ChildResource>,
    config_maps: BTreeMap<String, ConfigMap>,
    calls: Vec<StoreCall>,
    faults: Vec<(FaultMatcher, StoreError)>,
    revision: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    /// Record the call and fire the first matching fault, consuming it
    fn enter(&mut self, call: StoreCall) -> StoreResult<()> {
        let fault = self.faults.iter().position(|(matcher, _)| matcher(&call));
        self.calls.push(call);
        match fault {
            Some(index) => Err(self.faults.remove(index).1),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed or replace a Release, assigning a fresh resource version
    pub fn insert_release(&self, mut release: Release) {
        let mut state = self.state();
        release.metadata.resource_version = Some(state.next_version());
        state.releases.insert(release.name_any(), release);
    }

    pub fn remove_release(&self, name: &str) {
        self.state().releases.remove(name);
    }

    pub fn insert_release_cycle(&self, cycle: ReleaseCycle) {
        self.state().cycles.insert(cycle.name_any(), cycle);
    }

    /// Seed an observed child resource as-is (labels included)
    pub fn insert_child(&self, mut child: ChildResource) {
        let mut state = self.state();
        child.meta_mut().resource_version = Some(state.next_version());
        let key = (child.kind(), child.name().to_string());
        state.children.insert(key, child);
    }

    pub fn insert_config_map(&self, mut config_map: ConfigMap) {
        let mut state = self.state();
        config_map.metadata.resource_version = Some(state.next_version());
        state.config_maps.insert(config_map.name_any(), config_map);
    }

    pub fn release(&self, name: &str) -> Option<Release> {
        self.state().releases.get(name).cloned()
    }

    pub fn child(&self, kind: ChildKind, name: &str) -> Option<ChildResource> {
        self.state()
            .children
            .get(&(kind, name.to_string()))
            .cloned()
    }

    /// Names of all stored children of a kind, sorted
    pub fn child_names(&self, kind: ChildKind) -> Vec<String> {
        self.state()
            .children
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn mutations(&self) -> Vec<StoreCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Fail the next call matching `when` with `error`
    pub fn inject_fault(
        &self,
        when: impl Fn(&StoreCall) -> bool + Send + 'static,
        error: StoreError,
    ) {
        self.state().faults.push((Box::new(when), error));
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list_releases(&self) -> StoreResult<Vec<Release>> {
        let mut state = self.state();
        state.enter(StoreCall::ListReleases)?;
        Ok(state.releases.values().cloned().collect())
    }

    async fn get_release(&self, name: &str) -> StoreResult<Release> {
        let mut state = self.state();
        state.enter(StoreCall::GetRelease(name.to_string()))?;
        state
            .releases
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::not_found("Release", name))
    }

    async fn update_release(&self, release: &Release) -> StoreResult<Release> {
        let name = release.name_any();
        let mut state = self.state();
        state.enter(StoreCall::UpdateRelease(name.clone()))?;

        let current = state
            .releases
            .get(&name)
            .ok_or_else(|| StoreError::not_found("Release", &name))?;
        if release.metadata.resource_version != current.metadata.resource_version {
            return Err(StoreError::conflict("Release", &name));
        }

        let mut updated = release.clone();
        updated.metadata.resource_version = Some(state.next_version());
        state.releases.insert(name, updated.clone());
        Ok(updated)
    }

    async fn list_release_cycles(&self) -> StoreResult<Vec<ReleaseCycle>> {
        let mut state = self.state();
        state.enter(StoreCall::ListReleaseCycles)?;
        Ok(state.cycles.values().cloned().collect())
    }

    async fn list_children(
        &self,
        kind: ChildKind,
        selector: &str,
    ) -> StoreResult<Vec<ChildResource>> {
        let mut state = self.state();
        state.enter(StoreCall::ListChildren(kind))?;
        Ok(state
            .children
            .iter()
            .filter(|((k, _), child)| {
                *k == kind && selector_matches(selector, child.meta().labels.as_ref())
            })
            .map(|(_, child)| child.clone())
            .collect())
    }

    async fn create_child(&self, child: &ChildResource) -> StoreResult<()> {
        let kind = child.kind();
        let name = child.name().to_string();
        let mut state = self.state();
        state.enter(StoreCall::CreateChild(kind, name.clone()))?;

        let key = (kind, name);
        if state.children.contains_key(&key) {
            return Err(StoreError::already_exists(kind.as_str(), &key.1));
        }
        let mut stored = child.clone();
        stored.meta_mut().resource_version = Some(state.next_version());
        state.children.insert(key, stored);
        Ok(())
    }

    async fn update_child(&self, child: &ChildResource) -> StoreResult<()> {
        let kind = child.kind();
        let name = child.name().to_string();
        let mut state = self.state();
        state.enter(StoreCall::UpdateChild(kind, name.clone()))?;

        let key = (kind, name);
        let current = state
            .children
            .get(&key)
            .ok_or_else(|| StoreError::not_found(kind.as_str(), &key.1))?;
        if child.resource_version() != current.resource_version() {
            return Err(StoreError::conflict(kind.as_str(), &key.1));
        }
        let mut stored = child.clone();
        stored.meta_mut().resource_version = Some(state.next_version());
        state.children.insert(key, stored);
        Ok(())
    }

    async fn delete_child(&self, kind: ChildKind, name: &str) -> StoreResult<()> {
        let mut state = self.state();
        state.enter(StoreCall::DeleteChild(kind, name.to_string()))?;
        state
            .children
            .remove(&(kind, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(kind.as_str(), name))
    }

    async fn get_config_map(&self, name: &str) -> StoreResult<ConfigMap> {
        let mut state = self.state();
        state.enter(StoreCall::GetConfigMap(name.to_string()))?;
        if let Some(cm) = state.config_maps.get(name) {
            return Ok(cm.clone());
        }
        match state
            .children
            .get(&(ChildKind::ConfigObject, name.to_string()))
        {
            Some(ChildResource::ConfigObject(cm)) => Ok(cm.clone()),
            _ => Err(StoreError::not_found("ConfigMap", name)),
        }
    }
}
