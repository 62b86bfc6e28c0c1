//! Desired component set extraction
//!
//! Eligible Releases (not EOL, not being deleted) contribute all their valid
//! components. An excluded Release keeps a component alive only when an
//! eligible Release lists the same `(name, version)` too, so a shared
//! dependency is never torn down under an active Release.

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;
use tracing::{debug, warn};

use crate::crd::{Component, ComponentKey, Release};

/// Desired components keyed by `(name, version)`, iterated in key order
pub type DesiredComponents = BTreeMap<ComponentKey, Component>;

/// Compute the component set that must be materialized for `releases`
///
/// Pure and deterministic. The first eligible Release listing a key (in
/// input order) provides the non-identity fields of the entry.
pub fn extract_desired_components(releases: &[Release]) -> DesiredComponents {
    let (eligible, excluded): (Vec<&Release>, Vec<&Release>) =
        releases.iter().partition(|r| r.is_eligible());

    let mut desired = DesiredComponents::new();
    for release in &eligible {
        warn_invalid(release);
        for component in valid_components(release) {
            desired
                .entry(component.key())
                .or_insert_with(|| component.clone());
        }
    }

    // Retention is evaluated per excluded Release against the whole eligible
    // union; retained keys are by construction already in the desired set.
    let eligible_keys: BTreeSet<ComponentKey> = desired.keys().cloned().collect();
    for release in &excluded {
        let retained = retained_components(release, &eligible_keys);
        if !retained.is_empty() {
            debug!(
                "Release {} ({}) keeps {} shared component(s): {}",
                release.name_any(),
                if release.deletion_requested() { "deleting" } else { "EOL" },
                retained.len(),
                retained.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
            );
        }
    }

    desired
}

/// Components of an excluded Release still listed by some eligible Release
pub fn retained_components(
    release: &Release,
    eligible_keys: &BTreeSet<ComponentKey>,
) -> BTreeSet<ComponentKey> {
    valid_components(release)
        .map(Component::key)
        .filter(|key| eligible_keys.contains(key))
        .collect()
}

/// Components of a Release that can be materialized
pub fn valid_components(release: &Release) -> impl Iterator<Item = &Component> {
    release.spec.components.iter().filter(|c| c.is_valid())
}

fn warn_invalid(release: &Release) {
    if let Err(problems) = release.spec.validate() {
        for problem in problems {
            warn!("Release {}: {}", release.name_any(), problem);
        }
    }
}
