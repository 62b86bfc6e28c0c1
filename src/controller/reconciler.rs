//! Generic child-resource diff engine
//!
//! One [`ChildReconciler`] runs per child kind. Each pass re-reads all
//! Releases, extracts the desired component set, lists the managed children
//! of its kind and converges them:
//!
//! 1. delete obsolete children (no matching desired component)
//! 2. create missing children (no matching observed object)
//! 3. update matched children whose non-identity fields drifted
//!
//! The pass is stateless and idempotent. Races with concurrent passes or
//! external actors (`NotFound` on delete, `AlreadyExists` on create,
//! `Conflict`/`NotFound` on update) count as success; any other store error
//! aborts the pass with partial progress, corrected by the next pass.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::OperatorConfig;
use crate::crd::Component;
use crate::error::{Error, Result};
use crate::store::{ResourceStore, StoreError};

use super::child::{ChildKind, ChildResource};
use super::extractor::extract_desired_components;
use super::identity::matches;
use super::pass::PassContext;

/// Mutations issued by one pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Number of objects this pass wanted to exist
    pub desired: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl ReconcileOutcome {
    pub fn mutations(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    pub fn is_noop(&self) -> bool {
        self.mutations() == 0
    }
}

/// A reconciliation pass that can be invoked repeatedly by the event loop
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Stable name used in logs and metric labels
    fn name(&self) -> &'static str;

    async fn ensure_state(&self, pass: &PassContext) -> Result<ReconcileOutcome>;
}

/// Cross-resource state read once at the start of a pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassInputs {
    /// Resource version of the GitOps settings ConfigMap, if configured and present
    pub settings_version: Option<String>,
}

/// Kind-specific behaviour plugged into [`ChildReconciler`]
#[async_trait]
pub trait ChildHandler: Send + Sync {
    fn kind(&self) -> ChildKind;

    /// Whether a desired component needs a child of this kind at all
    fn wants(&self, _component: &Component) -> bool {
        true
    }

    async fn observe_inputs(&self, _store: &dyn ResourceStore) -> Result<PassInputs> {
        Ok(PassInputs::default())
    }

    /// The child that should exist for `component`, identity fields set
    fn desired(&self, component: &Component, inputs: &PassInputs) -> ChildResource;

    /// Extra lookups, executed only for children about to be created
    async fn complete(
        &self,
        child: ChildResource,
        _component: &Component,
    ) -> Result<ChildResource> {
        Ok(child)
    }

    /// A refreshed copy of `observed` (keeping its resource version) when a
    /// non-identity field differs from `desired`
    fn drift(&self, desired: &ChildResource, observed: &ChildResource) -> Option<ChildResource>;
}

/// Actions computed for one pass
#[derive(Debug, Default)]
pub struct ChildPlan {
    pub obsolete: Vec<String>,
    pub missing: Vec<(Component, ChildResource)>,
    pub drifted: Vec<ChildResource>,
}

/// Diff desired against observed children
///
/// Observed objects already being deleted neither satisfy a desired
/// component nor get deleted again. An object with a desired name but
/// mismatching identity is both obsolete and missing; deletes run first.
pub fn plan_children<H: ChildHandler + ?Sized>(
    handler: &H,
    desired: Vec<(Component, ChildResource)>,
    observed: &[ChildResource],
) -> ChildPlan {
    let by_name: HashMap<&str, usize> = desired
        .iter()
        .enumerate()
        .map(|(i, (_, child))| (child.name(), i))
        .collect();

    let mut satisfied = vec![false; desired.len()];
    let mut plan = ChildPlan::default();

    for object in observed {
        if object.is_being_deleted() {
            debug!("{} {} is being deleted, ignoring", object.kind(), object.name());
            continue;
        }
        match by_name
            .get(object.name())
            .filter(|&&i| matches(&desired[i].1, object))
        {
            Some(&i) => {
                satisfied[i] = true;
                if let Some(refreshed) = handler.drift(&desired[i].1, object) {
                    plan.drifted.push(refreshed);
                }
            }
            None => plan.obsolete.push(object.name().to_string()),
        }
    }

    plan.missing = desired
        .into_iter()
        .zip(satisfied)
        .filter(|(_, done)| !done)
        .map(|(entry, _)| entry)
        .collect();
    plan
}

/// Diff engine for one child kind
pub struct ChildReconciler<H> {
    store: Arc<dyn ResourceStore>,
    config: Arc<OperatorConfig>,
    handler: H,
}

impl<H: ChildHandler> ChildReconciler<H> {
    /// Fails with `ConfigError` when `config` is unusable
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config: Arc<OperatorConfig>,
        handler: H,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            handler,
        })
    }

    pub fn kind(&self) -> ChildKind {
        self.handler.kind()
    }

    async fn delete_obsolete(&self, pass: &PassContext, name: &str) -> Result<bool> {
        let kind = self.kind();
        let operation = format!("delete {kind}/{name}");
        pass.check(&operation)?;

        match self.store.delete_child(kind, name).await {
            Ok(()) => {
                info!("Deleted obsolete {} {}", kind, name);
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!("{} {} already gone", kind, name);
                Ok(false)
            }
            Err(e) => Err(Error::store(operation, e)),
        }
    }

    async fn create_missing(
        &self,
        pass: &PassContext,
        component: &Component,
        child: ChildResource,
    ) -> Result<bool> {
        let kind = self.kind();
        let operation = format!("create {kind}/{}", child.name());
        let child = self.handler.complete(child, component).await?;
        pass.check(&operation)?;

        match self.store.create_child(&child).await {
            Ok(()) => {
                info!("Created {} {} for {}", kind, child.name(), component.key());
                Ok(true)
            }
            // A concurrent pass, or an unmanaged object holding the name.
            Err(StoreError::AlreadyExists { .. }) => {
                warn!(
                    "{} {} for {} already exists outside the managed set; \
                     if this repeats, an unmanaged object holds the name",
                    kind,
                    child.name(),
                    component.key()
                );
                Ok(false)
            }
            Err(e) => Err(Error::store(operation, e)),
        }
    }

    async fn update_drifted(&self, pass: &PassContext, child: &ChildResource) -> Result<bool> {
        let kind = self.kind();
        let operation = format!("update {kind}/{}", child.name());
        pass.check(&operation)?;

        match self.store.update_child(child).await {
            Ok(()) => {
                info!("Updated drifted {} {}", kind, child.name());
                Ok(true)
            }
            Err(e @ (StoreError::Conflict { .. } | StoreError::NotFound { .. })) => {
                debug!("Skipping update of {} {}: {}", kind, child.name(), e);
                Ok(false)
            }
            Err(e) => Err(Error::store(operation, e)),
        }
    }
}

#[async_trait]
impl<H: ChildHandler> Reconciler for ChildReconciler<H> {
    fn name(&self) -> &'static str {
        self.kind().controller_name()
    }

    #[instrument(skip(self, pass), fields(controller = self.name()))]
    async fn ensure_state(&self, pass: &PassContext) -> Result<ReconcileOutcome> {
        let kind = self.kind();

        let releases = self
            .store
            .list_releases()
            .await
            .map_err(|e| Error::store("list Releases", e))?;
        let components = extract_desired_components(&releases);
        let inputs = self.handler.observe_inputs(self.store.as_ref()).await?;

        let desired: Vec<(Component, ChildResource)> = components
            .values()
            .filter(|c| self.handler.wants(c))
            .map(|c| (c.clone(), self.handler.desired(c, &inputs)))
            .collect();

        let observed = self
            .store
            .list_children(kind, &self.config.managed_selector())
            .await
            .map_err(|e| Error::store(format!("list {kind}"), e))?;
        for object in &observed {
            object.ensure_kind(kind)?;
        }

        let mut outcome = ReconcileOutcome {
            desired: desired.len(),
            ..Default::default()
        };
        let plan = plan_children(&self.handler, desired, &observed);
        debug!(
            "{} plan: {} obsolete, {} missing, {} drifted",
            kind,
            plan.obsolete.len(),
            plan.missing.len(),
            plan.drifted.len()
        );

        for name in &plan.obsolete {
            if self.delete_obsolete(pass, name).await? {
                outcome.deleted += 1;
            }
        }
        for (component, child) in plan.missing {
            if self.create_missing(pass, &component, child).await? {
                outcome.created += 1;
            }
        }
        for child in &plan.drifted {
            if self.update_drifted(pass, child).await? {
                outcome.updated += 1;
            }
        }

        Ok(outcome)
    }
}
