//! Custom Resource Definitions for the release operator
//!
//! `Release`, `ReleaseCycle` and `AppInstall` are owned by this operator.
//! `Application` is the Argo CD descriptor it writes for GitOps delivery.

mod app_install;
pub mod gitops;
mod release;
mod release_cycle;
pub mod types;


pub use app_install::{AppInstall, AppInstallSpec, AppInstallStatus, APP_INSTALL_PHASE_FAILED};
pub use gitops::{
    Application, ApplicationDestination, ApplicationSource, ApplicationSpec, AutomatedSync,
    PluginEnv, PluginSource, SyncPolicy,
};
pub use release::{Component, ComponentKey, Release, ReleaseSpec, ReleaseState, ReleaseStatus};
pub use release_cycle::{ReleaseCycle, ReleaseCycleSpec};
pub use types::{Condition, SpecValidationError};
