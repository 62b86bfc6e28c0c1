//! Tests for the generic diff engine
//!
//! These tests verify the core reconciliation logic including:
//! - Minimal create/delete sets against observed children
//! - Idempotence across passes
//! - Tolerated races and fatal store errors
//! - Kind checks and cancellation

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::ConfigMap;
    use tokio::sync::watch;

    use super::super::app_install::{self, build_app_install, AppInstallHandler};
    use super::super::child::{ChildKind, ChildResource};
    use super::super::pass::PassContext;
    use super::super::reconciler::*;
    use super::super::test_support::{managed_install, release, store_and_config};
    use crate::config::OperatorConfig;
    use crate::crd::{Component, Release, ReleaseCycle, ReleaseState};
    use crate::error::Error;
    use crate::store::{MemoryStore, ResourceStore, StoreCall, StoreError, StoreResult};

    fn create(name: &str) -> StoreCall {
        StoreCall::CreateChild(ChildKind::AppInstall, name.to_string())
    }

    fn delete(name: &str) -> StoreCall {
        StoreCall::DeleteChild(ChildKind::AppInstall, name.to_string())
    }

    fn update(name: &str) -> StoreCall {
        StoreCall::UpdateChild(ChildKind::AppInstall, name.to_string())
    }

    fn setup(
        releases: Vec<Release>,
        observed: &[(&str, &str)],
    ) -> (Arc<MemoryStore>, app_install::AppInstallReconciler) {
        let (store, config) = store_and_config();
        for r in releases {
            store.insert_release(r);
        }
        for (name, version) in observed {
            store.insert_child(managed_install(&config, name, version));
        }
        store.clear_calls();
        let reconciler = app_install::reconciler(store.clone(), config).unwrap();
        (store, reconciler)
    }

    #[tokio::test]
    async fn test_creates_only_missing_child() {
        let (store, reconciler) = setup(
            vec![release("r1", ReleaseState::Active, &[("c1", "v1"), ("c2", "v2")])],
            &[("c1", "v1")],
        );

        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();

        assert_eq!((outcome.created, outcome.deleted, outcome.updated), (1, 0, 0));
        assert_eq!(store.mutations(), vec![create("c2.v2")]);
    }

    #[tokio::test]
    async fn test_deletes_only_obsolete_child() {
        let (store, reconciler) = setup(
            vec![release("r1", ReleaseState::Active, &[("c1", "v1")])],
            &[("c1", "v1"), ("c3", "v3")],
        );

        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();

        assert_eq!((outcome.created, outcome.deleted, outcome.updated), (0, 1, 0));
        assert_eq!(store.mutations(), vec![delete("c3.v3")]);
        assert_eq!(store.child_names(ChildKind::AppInstall), vec!["c1.v1"]);
    }

    #[tokio::test]
    async fn test_second_pass_is_a_noop() {
        let (store, reconciler) = setup(
            vec![
                release("r1", ReleaseState::Active, &[("c1", "v1"), ("c2", "v2")]),
                release("r0", ReleaseState::Eol, &[("c0", "v0"), ("c1", "v1")]),
            ],
            &[("c0", "v0")],
        );

        let first = reconciler.ensure_state(&PassContext::new()).await.unwrap();
        assert_eq!((first.created, first.deleted), (2, 1));

        store.clear_calls();
        let second = reconciler.ensure_state(&PassContext::new()).await.unwrap();
        assert!(second.is_noop());
        assert_eq!(second.desired, 2);
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_deletes_run_before_creates() {
        let (store, reconciler) = setup(
            vec![release("r1", ReleaseState::Active, &[("c1", "v1"), ("c2", "v2")])],
            &[("c8", "v8"), ("c9", "v9")],
        );

        reconciler.ensure_state(&PassContext::new()).await.unwrap();

        assert_eq!(
            store.mutations(),
            vec![delete("c8.v8"), delete("c9.v9"), create("c1.v1"), create("c2.v2")]
        );
    }

    #[tokio::test]
    async fn test_unmanaged_objects_are_never_touched() {
        let (store, config) = store_and_config();
        let mut foreign = build_app_install(&config, &Component::new("legacy", "1.0", "stable"));
        foreign.metadata.labels = None;
        store.insert_child(ChildResource::AppInstall(foreign));

        let reconciler = app_install::reconciler(store.clone(), config).unwrap();
        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();

        assert!(outcome.is_noop());
        assert_eq!(store.child_names(ChildKind::AppInstall), vec!["legacy.1.0"]);
    }

    #[tokio::test]
    async fn test_unmanaged_name_holder_blocks_create_every_pass() {
        let (store, config) = store_and_config();
        store.insert_release(release("r1", ReleaseState::Active, &[("c1", "v1")]));
        let mut foreign = build_app_install(&config, &Component::new("c1", "v1", "legacy"));
        foreign.metadata.labels = None;
        store.insert_child(ChildResource::AppInstall(foreign));
        let reconciler = app_install::reconciler(store.clone(), config).unwrap();

        for _ in 0..2 {
            store.clear_calls();
            let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();

            assert_eq!((outcome.created, outcome.deleted, outcome.updated), (0, 0, 0));
            assert_eq!(store.mutations(), vec![create("c1.v1")]);
        }
        let ChildResource::AppInstall(held) = store.child(ChildKind::AppInstall, "c1.v1").unwrap()
        else {
            panic!("expected an AppInstall");
        };
        assert_eq!(held.spec.catalog, "legacy");
        assert!(held.metadata.labels.is_none());
    }

    #[tokio::test]
    async fn test_terminating_children_are_left_alone() {
        let (store, config) = store_and_config();
        let mut terminating = managed_install(&config, "c3", "v3");
        terminating.meta_mut().deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        store.insert_child(terminating);

        let reconciler = app_install::reconciler(store.clone(), config).unwrap();
        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();

        assert!(outcome.is_noop());
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_stale_identity_is_replaced() {
        let (store, config) = store_and_config();
        store.insert_release(release("r1", ReleaseState::Active, &[("c1", "v1")]));
        let mut stale = build_app_install(&config, &Component::new("c1", "v1", "stable"));
        stale.spec.version = "v0".to_string();
        store.insert_child(ChildResource::AppInstall(stale));
        store.clear_calls();

        let reconciler = app_install::reconciler(store.clone(), config).unwrap();
        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();

        assert_eq!((outcome.created, outcome.deleted), (1, 1));
        assert_eq!(store.mutations(), vec![delete("c1.v1"), create("c1.v1")]);
        let recreated = store.child(ChildKind::AppInstall, "c1.v1").unwrap();
        assert_eq!(recreated.as_app_install().unwrap().spec.version, "v1");
    }

    #[tokio::test]
    async fn test_drifted_catalog_is_updated_in_place() {
        let (store, config) = store_and_config();
        let mut r1 = release("r1", ReleaseState::Active, &[("c1", "v1")]);
        r1.spec.components[0].catalog = "edge".to_string();
        store.insert_release(r1);
        store.insert_child(managed_install(&config, "c1", "v1"));
        store.clear_calls();

        let reconciler = app_install::reconciler(store.clone(), config).unwrap();
        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();

        assert_eq!((outcome.created, outcome.updated, outcome.deleted), (0, 1, 0));
        assert_eq!(store.mutations(), vec![update("c1.v1")]);
        let updated = store.child(ChildKind::AppInstall, "c1.v1").unwrap();
        assert_eq!(updated.as_app_install().unwrap().spec.catalog, "edge");
    }

    #[tokio::test]
    async fn test_races_are_tolerated() {
        let (store, reconciler) = setup(
            vec![release("r1", ReleaseState::Active, &[("c1", "v1")])],
            &[("c3", "v3")],
        );
        store.inject_fault(
            |call| matches!(call, StoreCall::DeleteChild(..)),
            StoreError::not_found("AppInstall", "c3.v3"),
        );
        store.inject_fault(
            |call| matches!(call, StoreCall::CreateChild(..)),
            StoreError::already_exists("AppInstall", "c1.v1"),
        );

        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();
        assert!(outcome.is_noop());
        assert_eq!(store.mutations(), vec![delete("c3.v3"), create("c1.v1")]);
    }

    #[tokio::test]
    async fn test_update_conflict_is_tolerated() {
        let (store, config) = store_and_config();
        let mut r1 = release("r1", ReleaseState::Active, &[("c1", "v1")]);
        r1.spec.components[0].catalog = "edge".to_string();
        store.insert_release(r1);
        store.insert_child(managed_install(&config, "c1", "v1"));
        store.inject_fault(
            |call| matches!(call, StoreCall::UpdateChild(..)),
            StoreError::conflict("AppInstall", "c1.v1"),
        );

        let reconciler = app_install::reconciler(store.clone(), config).unwrap();
        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();
        assert_eq!(outcome.updated, 0);

        // Level-triggered: the next pass converges.
        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();
        assert_eq!(outcome.updated, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_aborts_remaining_actions() {
        let (store, reconciler) = setup(
            vec![release("r1", ReleaseState::Active, &[("c1", "v1"), ("c2", "v2")])],
            &[("c3", "v3")],
        );
        store.inject_fault(
            |call| *call == StoreCall::CreateChild(ChildKind::AppInstall, "c1.v1".to_string()),
            StoreError::Rejected("admission webhook denied".to_string()),
        );

        let err = reconciler.ensure_state(&PassContext::new()).await.unwrap_err();

        assert!(!err.is_retriable());
        assert!(err.to_string().starts_with("create AppInstall/c1.v1 failed"));
        // The delete went through, c2 was never attempted.
        assert_eq!(store.mutations(), vec![delete("c3.v3"), create("c1.v1")]);

        store.clear_calls();
        let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();
        assert_eq!(store.mutations(), vec![create("c1.v1"), create("c2.v2")]);
        assert_eq!(outcome.created, 2);
    }

    #[tokio::test]
    async fn test_list_errors_are_fatal_and_transient() {
        let (store, reconciler) = setup(vec![], &[]);
        store.inject_fault(
            |call| matches!(call, StoreCall::ListChildren(_)),
            StoreError::Transient("apiserver unavailable".to_string()),
        );

        let err = reconciler.ensure_state(&PassContext::new()).await.unwrap_err();
        assert!(err.is_retriable());
        assert!(matches!(err, Error::Store { .. }));
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_pass_stops_before_mutating() {
        let (store, reconciler) = setup(
            vec![release("r1", ReleaseState::Active, &[("c1", "v1")])],
            &[("c3", "v3")],
        );
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let err = reconciler
            .ensure_state(&PassContext::new().with_shutdown(rx))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(_)));
        assert!(!err.is_retriable());
        assert!(store.mutations().is_empty());
    }

    /// Hands out ConfigMaps when asked for AppInstalls
    struct MisfilingStore(MemoryStore);

    #[async_trait]
    impl ResourceStore for MisfilingStore {
        async fn list_releases(&self) -> StoreResult<Vec<Release>> {
            self.0.list_releases().await
        }
        async fn get_release(&self, name: &str) -> StoreResult<Release> {
            self.0.get_release(name).await
        }
        async fn update_release(&self, release: &Release) -> StoreResult<Release> {
            self.0.update_release(release).await
        }
        async fn list_release_cycles(&self) -> StoreResult<Vec<ReleaseCycle>> {
            self.0.list_release_cycles().await
        }
        async fn list_children(
            &self,
            _kind: ChildKind,
            _selector: &str,
        ) -> StoreResult<Vec<ChildResource>> {
            Ok(vec![ChildResource::ConfigObject(ConfigMap {
                metadata: kube::api::ObjectMeta {
                    name: Some("c1.v1".to_string()),
                    labels: Some(BTreeMap::new()),
                    ..Default::default()
                },
                ..Default::default()
            })])
        }
        async fn create_child(&self, child: &ChildResource) -> StoreResult<()> {
            self.0.create_child(child).await
        }
        async fn update_child(&self, child: &ChildResource) -> StoreResult<()> {
            self.0.update_child(child).await
        }
        async fn delete_child(&self, kind: ChildKind, name: &str) -> StoreResult<()> {
            self.0.delete_child(kind, name).await
        }
        async fn get_config_map(&self, name: &str) -> StoreResult<ConfigMap> {
            self.0.get_config_map(name).await
        }
    }

    #[tokio::test]
    async fn test_wrong_kind_fails_the_pass() {
        let inner = MemoryStore::new();
        inner.insert_release(release("r1", ReleaseState::Active, &[("c1", "v1")]));
        let store = Arc::new(MisfilingStore(inner));
        let config = Arc::new(OperatorConfig::default());

        let reconciler =
            ChildReconciler::new(store.clone(), config.clone(), AppInstallHandler::new(config))
                .unwrap();
        let err = reconciler.ensure_state(&PassContext::new()).await.unwrap_err();

        assert!(matches!(err, Error::WrongType { .. }));
        assert!(!err.is_retriable());
        assert!(store.0.mutations().is_empty());
    }

    #[test]
    fn test_plan_handles_empty_inputs() {
        let handler = AppInstallHandler::new(Arc::new(OperatorConfig::default()));
        let plan = plan_children(&handler, Vec::new(), &[]);
        assert!(plan.obsolete.is_empty() && plan.missing.is_empty() && plan.drifted.is_empty());
    }
}
