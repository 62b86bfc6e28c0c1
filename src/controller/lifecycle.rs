//! Lifecycle status projector
//!
//! Writes two derived facts back onto every Release that is not being
//! deleted: the cycle-phase label and the `deployed` flag with its `Ready`
//! condition. A Release is deployed once each of its own valid components
//! has a matching AppInstall that is neither being deleted nor failed.
//!
//! Writes are read-latest, mutate, update with a resource version
//! precondition, and only happen when something changed. A conflict or a
//! vanished Release skips that Release until the next pass.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::config::OperatorConfig;
use crate::crd::{AppInstall, ComponentKey, Release, ReleaseState};
use crate::error::{Error, Result};
use crate::store::{ResourceStore, StoreError};

use super::app_install::build_app_install;
use super::child::{ChildKind, ChildResource};
use super::conditions::{
    set_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_READY,
    REASON_ALL_INSTALLED, REASON_END_OF_LIFE, REASON_PENDING,
};
use super::extractor::valid_components;
use super::identity::matches;
use super::pass::PassContext;
use super::reconciler::{ReconcileOutcome, Reconciler};

/// Pending components listed in the Ready message before truncating
const PENDING_SHOWN: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclePhase {
    /// No activation object exists yet (or the Release is still WIP)
    Upcoming,
    Enabled,
    Eol,
}

impl CyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CyclePhase::Upcoming => "Upcoming",
            CyclePhase::Enabled => "Enabled",
            CyclePhase::Eol => "EOL",
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a Release given whether an activation object names it
///
/// `Deprecated` counts as `Active` here, so an activated Release stays
/// `Enabled` until it reaches EOL.
pub fn cycle_phase(release: &Release, activated: bool) -> CyclePhase {
    match release.spec.state {
        ReleaseState::Eol => CyclePhase::Eol,
        ReleaseState::Active | ReleaseState::Deprecated if activated => CyclePhase::Enabled,
        _ => CyclePhase::Upcoming,
    }
}

/// Derived state of one Release
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Projection {
    pub phase: CyclePhase,
    pub deployed: bool,
    /// Components without a healthy install, in key order
    pub pending: Vec<ComponentKey>,
    /// Field paths of listed components that can never be installed
    pub invalid: Vec<String>,
}

/// Project a Release against the observed AppInstalls (indexed by name)
pub fn project_release(
    config: &OperatorConfig,
    release: &Release,
    installs: &HashMap<String, ChildResource>,
    activated: bool,
) -> Projection {
    let phase = cycle_phase(release, activated);
    if phase == CyclePhase::Eol {
        return Projection {
            phase,
            deployed: false,
            pending: Vec::new(),
            invalid: Vec::new(),
        };
    }

    let pending: BTreeSet<ComponentKey> = valid_components(release)
        .filter(|component| {
            let desired = ChildResource::AppInstall(build_app_install(config, component));
            let healthy = installs
                .get(desired.name())
                .filter(|observed| matches(&desired, observed))
                .and_then(|observed| observed.as_app_install().ok())
                .is_some_and(|install: &AppInstall| {
                    install.metadata.deletion_timestamp.is_none() && !install.has_failed()
                });
            !healthy
        })
        .map(|component| component.key())
        .collect();

    let invalid: Vec<String> = release
        .spec
        .components
        .iter()
        .enumerate()
        .filter(|(_, component)| !component.is_valid())
        .map(|(i, _)| format!("spec.components[{i}]"))
        .collect();

    Projection {
        phase,
        deployed: pending.is_empty() && invalid.is_empty(),
        pending: pending.into_iter().collect(),
        invalid,
    }
}

/// Apply a projection to a Release; returns whether anything changed
pub fn apply_projection(
    config: &OperatorConfig,
    release: &mut Release,
    projection: &Projection,
) -> bool {
    let before_labels = release.metadata.labels.clone();
    let before_status = release.status.clone();

    release
        .labels_mut()
        .insert(config.labels.cycle_phase_key.clone(), projection.phase.to_string());

    let generation = release.metadata.generation;
    let status = release.status.get_or_insert_with(Default::default);
    status.deployed = projection.deployed;
    status.observed_generation = generation;

    let (condition_status, reason, message) = if projection.phase == CyclePhase::Eol {
        (
            CONDITION_STATUS_FALSE,
            REASON_END_OF_LIFE,
            "Release is end-of-life".to_string(),
        )
    } else if projection.deployed {
        (
            CONDITION_STATUS_TRUE,
            REASON_ALL_INSTALLED,
            "All components are installed".to_string(),
        )
    } else {
        let waiting: Vec<String> = projection
            .pending
            .iter()
            .map(ToString::to_string)
            .chain(projection.invalid.iter().map(|path| format!("invalid {path}")))
            .collect();
        let mut shown: Vec<String> = waiting.iter().take(PENDING_SHOWN).cloned().collect();
        if waiting.len() > PENDING_SHOWN {
            shown.push(format!("and {} more", waiting.len() - PENDING_SHOWN));
        }
        (
            CONDITION_STATUS_FALSE,
            REASON_PENDING,
            format!("Waiting for {}", shown.join(", ")),
        )
    };
    set_condition(
        &mut status.conditions,
        CONDITION_TYPE_READY,
        condition_status,
        reason,
        &message,
        generation,
    );

    release.metadata.labels != before_labels || release.status != before_status
}

pub struct LifecycleProjector {
    store: Arc<dyn ResourceStore>,
    config: Arc<OperatorConfig>,
}

impl LifecycleProjector {
    pub fn new(store: Arc<dyn ResourceStore>, config: Arc<OperatorConfig>) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Re-read, re-project and write one Release; false when skipped
    async fn write_release(
        &self,
        pass: &PassContext,
        name: &str,
        installs: &HashMap<String, ChildResource>,
        activated: bool,
    ) -> Result<bool> {
        let operation = format!("update Release/{name}");
        pass.check(&operation)?;

        let mut latest = match self.store.get_release(name).await {
            Ok(release) => release,
            Err(e) if e.is_not_found() => {
                debug!("Release {} vanished before status update", name);
                return Ok(false);
            }
            Err(e) => return Err(Error::store(format!("get Release/{name}"), e)),
        };
        if latest.deletion_requested() {
            return Ok(false);
        }

        let projection = project_release(&self.config, &latest, installs, activated);
        if !apply_projection(&self.config, &mut latest, &projection) {
            return Ok(false);
        }

        match self.store.update_release(&latest).await {
            Ok(_) => {
                info!(
                    "Release {}: phase={} deployed={}",
                    name, projection.phase, projection.deployed
                );
                Ok(true)
            }
            Err(e @ (StoreError::Conflict { .. } | StoreError::NotFound { .. })) => {
                debug!("Skipping status update of Release {}: {}", name, e);
                Ok(false)
            }
            Err(e) => Err(Error::store(operation, e)),
        }
    }
}

#[async_trait]
impl Reconciler for LifecycleProjector {
    fn name(&self) -> &'static str {
        "lifecycle"
    }

    #[instrument(skip(self, pass), fields(controller = self.name()))]
    async fn ensure_state(&self, pass: &PassContext) -> Result<ReconcileOutcome> {
        let releases = self
            .store
            .list_releases()
            .await
            .map_err(|e| Error::store("list Releases", e))?;
        let cycles = self
            .store
            .list_release_cycles()
            .await
            .map_err(|e| Error::store("list ReleaseCycles", e))?;
        let observed = self
            .store
            .list_children(ChildKind::AppInstall, &self.config.managed_selector())
            .await
            .map_err(|e| Error::store("list AppInstall", e))?;

        let mut installs = HashMap::with_capacity(observed.len());
        for object in observed {
            object.ensure_kind(ChildKind::AppInstall)?;
            installs.insert(object.name().to_string(), object);
        }
        let activated: BTreeSet<&str> = cycles.iter().map(|c| c.spec.release.as_str()).collect();

        let mut outcome = ReconcileOutcome::default();
        for release in releases.iter().filter(|r| !r.deletion_requested()) {
            let name = release.name_any();
            let is_activated = activated.contains(name.as_str());
            outcome.desired += 1;

            // Cheap check against the listed copy before paying for a fresh read.
            let projection = project_release(&self.config, release, &installs, is_activated);
            let mut candidate = release.clone();
            if !apply_projection(&self.config, &mut candidate, &projection) {
                continue;
            }

            if self.write_release(pass, &name, &installs, is_activated).await? {
                outcome.updated += 1;
            }
        }

        Ok(outcome)
    }
}
