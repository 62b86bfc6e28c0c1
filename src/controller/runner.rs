//! Event loop driving the reconcilers
//!
//! One worker task per reconciler keeps passes of the same kind strictly
//! sequential. Workers are woken by a shared Release watcher and by a
//! periodic resync; wake-ups arriving during a pass coalesce into a single
//! follow-up pass. Ctrl-C broadcasts shutdown through every pass context.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ListParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::Release;
use crate::error::{Error, Result};
use crate::store::{KubeStore, ResourceStore};

use super::catalog_index::{CatalogLookup, HttpCatalogIndex};
use super::lifecycle::LifecycleProjector;
use super::pass::PassContext;
use super::reconciler::Reconciler;
use super::retry::Instrumented;
use super::{app_install, config_object, gitops};

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub config: Arc<OperatorConfig>,
}

/// All reconcilers, each wrapped with retry and metrics
pub fn build_reconcilers(
    store: Arc<dyn ResourceStore>,
    config: Arc<OperatorConfig>,
    catalog: Arc<dyn CatalogLookup>,
) -> Result<Vec<Arc<dyn Reconciler>>> {
    let policy = config.retry.clone();
    let app_installs = app_install::reconciler(store.clone(), config.clone())?;
    let config_objects = config_object::reconciler(store.clone(), config.clone())?;
    let applications = gitops::reconciler(store.clone(), config.clone(), catalog)?;
    let lifecycle = LifecycleProjector::new(store, config)?;

    Ok(vec![
        Arc::new(Instrumented::new(app_installs, policy.clone())) as Arc<dyn Reconciler>,
        Arc::new(Instrumented::new(config_objects, policy.clone())),
        Arc::new(Instrumented::new(applications, policy.clone())),
        Arc::new(Instrumented::new(lifecycle, policy)),
    ])
}

/// Run passes of one reconciler whenever `trigger` fires, until shutdown
pub async fn run_worker(
    reconciler: Arc<dyn Reconciler>,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    pass_timeout: Duration,
) {
    let name = reconciler.name();
    debug!("{} worker started", name);

    loop {
        tokio::select! {
            _ = trigger.notified() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }
        if *shutdown.borrow() {
            break;
        }

        let pass = PassContext::new()
            .with_timeout(pass_timeout)
            .with_shutdown(shutdown.clone());
        match tokio::time::timeout(pass_timeout, reconciler.ensure_state(&pass)).await {
            Ok(Ok(outcome)) if outcome.is_noop() => {
                debug!("{} pass converged, {} desired", name, outcome.desired)
            }
            Ok(Ok(outcome)) => info!(
                "{} pass: {} created, {} updated, {} deleted",
                name, outcome.created, outcome.updated, outcome.deleted
            ),
            // Already logged by the retry decorator
            Ok(Err(_)) => {}
            Err(_) => warn!("{} pass exceeded {:?}", name, pass_timeout),
        }
    }

    debug!("{} worker stopped", name);
}

fn wake_all(triggers: &[Arc<Notify>]) {
    for trigger in triggers {
        trigger.notify_one();
    }
}

async fn watch_releases(api: Api<Release>, triggers: Vec<Arc<Notify>>) {
    let mut events = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(event) = events.next().await {
        match event {
            Ok(Event::Init | Event::InitApply(_)) => {}
            Ok(_) => wake_all(&triggers),
            Err(e) => warn!("Release watch error: {}", e),
        }
    }
}

async fn resync(interval: Duration, triggers: Vec<Arc<Notify>>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        debug!("Periodic resync");
        wake_all(&triggers);
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let config = state.config.clone();
    let releases: Api<Release> = Api::namespaced(state.client.clone(), &config.namespace);

    info!("Starting release controller in namespace {}", config.namespace);

    match releases.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("Release CRD is available"),
        Err(e) => {
            error!("Release CRD not found. Please install the CRD first: {:?}", e);
            return Err(Error::ConfigError("Release CRD not installed".to_string()));
        }
    }

    let store: Arc<dyn ResourceStore> = Arc::new(KubeStore::new(state.client.clone(), &config));
    let catalog: Arc<dyn CatalogLookup> = Arc::new(HttpCatalogIndex::new(&config)?);
    let reconcilers = build_reconcilers(store, config.clone(), catalog)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let triggers: Vec<Arc<Notify>> = reconcilers.iter().map(|_| Arc::new(Notify::new())).collect();

    let workers: Vec<JoinHandle<()>> = reconcilers
        .into_iter()
        .zip(&triggers)
        .map(|(reconciler, trigger)| {
            tokio::spawn(run_worker(
                reconciler,
                trigger.clone(),
                shutdown_rx.clone(),
                config.pass_timeout(),
            ))
        })
        .collect();

    let watch_task = tokio::spawn(watch_releases(releases, triggers.clone()));
    let resync_task = tokio::spawn(resync(config.resync_interval(), triggers));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown requested, waiting for running passes");

    watch_task.abort();
    resync_task.abort();
    let _ = shutdown_tx.send(true);
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Worker task failed: {}", e);
        }
    }

    info!("Release controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::controller::reconciler::ReconcileOutcome;
    use crate::crd::ReleaseState;
    use crate::controller::test_support::{release, store_and_config};
    use crate::store::MemoryStore;

    struct Counting {
        passes: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn ensure_state(&self, _pass: &PassContext) -> Result<ReconcileOutcome> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(ReconcileOutcome::default())
        }
    }

    struct NoCatalog;

    #[async_trait]
    impl CatalogLookup for NoCatalog {
        async fn config_version(&self, _: &str, _: &str, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_worker_runs_on_trigger_and_stops_on_shutdown() {
        let reconciler = Arc::new(Counting {
            passes: AtomicUsize::new(0),
        });
        let trigger = Arc::new(Notify::new());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_worker(
            reconciler.clone(),
            trigger.clone(),
            rx,
            Duration::from_secs(5),
        ));

        trigger.notify_one();
        for _ in 0..100 {
            if reconciler.passes.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reconciler.passes.load(Ordering::SeqCst), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_build_reconcilers_covers_every_controller() {
        let (store, config) = store_and_config();
        let reconcilers = build_reconcilers(store, config, Arc::new(NoCatalog)).unwrap();

        let names: Vec<&str> = reconcilers.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["appinstall", "configobject", "gitops", "lifecycle"]);
    }

    #[tokio::test]
    async fn test_all_reconcilers_converge_together() {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(OperatorConfig::default());
        let mut r1 = release("r1", ReleaseState::Active, &[("redis", "7.2"), ("nginx", "1.25")]);
        r1.spec.components[0].config_reference = Some("tuned".to_string());
        store.insert_release(r1);

        let reconcilers = build_reconcilers(store.clone(), config, Arc::new(NoCatalog)).unwrap();
        for reconciler in &reconcilers {
            reconciler.ensure_state(&PassContext::new()).await.unwrap();
        }
        for reconciler in &reconcilers {
            let outcome = reconciler.ensure_state(&PassContext::new()).await.unwrap();
            assert!(outcome.is_noop(), "{} not converged", reconciler.name());
        }

        assert!(store.release("r1").unwrap().status.unwrap().deployed);
    }
}
