//! Controller module for Release reconciliation
//!
//! Every pass starts from the full list of Releases, extracts the set of
//! desired components and converges one kind of child object towards it.
//! The lifecycle projector then writes the derived phase and deployment
//! status back onto each Release.

pub mod app_install;
pub mod catalog_index;
mod child;
pub mod conditions;
pub mod config_object;
mod extractor;
pub mod gitops;
mod identity;
mod lifecycle;
#[cfg(feature = "metrics")]
pub mod metrics;
mod pass;
mod reconciler;
mod retry;
mod runner;

#[cfg(test)]
mod reconciler_test;
#[cfg(test)]
mod test_support;

pub use catalog_index::{CatalogLookup, HttpCatalogIndex};
pub use child::{ChildKind, ChildResource};
pub use extractor::{
    extract_desired_components, retained_components, valid_components, DesiredComponents,
};
pub use identity::{derived_name, derived_name_for, matches};
pub use lifecycle::{
    apply_projection, cycle_phase, project_release, CyclePhase, LifecycleProjector, Projection,
};
pub use pass::PassContext;
pub use reconciler::{
    plan_children, ChildHandler, ChildPlan, ChildReconciler, PassInputs, ReconcileOutcome,
    Reconciler,
};
pub use retry::{Instrumented, RetryPolicy};
pub use runner::{build_reconcilers, run_controller, run_worker, ControllerState};
