//! Generic controller
//!
//! Bridges the scheduler (kube-runtime or the polling driver) and a plugin
//! handler: fetch the stored object, convert it to its domain model, hand it
//! to the handler and translate the answer into a requeue decision.

pub mod builder;
pub mod runner;

pub use builder::{ControllerSet, ObjectStores, PluginSet};
pub use runner::{cancel_on_signal, Backoff, KubeDriver, PollingDriver, SweepReport};

use crate::context::Context;
use crate::crd::{Condition, DomainMapping};
use crate::domain::{DomainResource, PluginHandlerRef, ResourceState};
use crate::error::{Error, Result};
use crate::metrics::{ControllerMetrics, Outcome};
use crate::store::{ObjectKey, ObjectStoreRef};
use chrono::Utc;
use kube::runtime::controller::Action;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Condition reason recorded on objects that fail domain conversion
pub const CONVERSION_FAILED_REASON: &str = "DomainConversionFailed";

/// Default delay before a requeued object is looked at again
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(300);

/// Converts a stored object into its domain model
pub type ToDomain<K, D> = fn(&K) -> Result<D>;

/// Scheduling decision for one reconciled object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileResult {
    pub requeue: bool,
    /// Zero means as soon as possible
    pub requeue_after: Duration,
}

impl ReconcileResult {
    /// Nothing left to do until the object changes
    pub fn done() -> Self {
        Self::default()
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue: true,
            requeue_after: after,
        }
    }

    pub fn into_action(self) -> Action {
        if self.requeue {
            Action::requeue(self.requeue_after)
        } else {
            Action::await_change()
        }
    }
}

/// Reconciler for one resource kind
pub struct GenericController<K, D> {
    store: ObjectStoreRef<K>,
    to_domain: ToDomain<K, D>,
    handler: PluginHandlerRef<D>,
    requeue_after: Duration,
    metrics: Option<ControllerMetrics>,
}

impl<K: DomainMapping> GenericController<K, K::Domain> {
    /// Controller converting through the kind's [`DomainMapping`]
    pub fn for_mapping(store: ObjectStoreRef<K>, handler: PluginHandlerRef<K::Domain>) -> Self {
        Self::new(store, K::to_domain, handler)
    }
}

impl<K, D> GenericController<K, D>
where
    K: Clone + Send + Sync + 'static,
    D: DomainResource,
{
    pub fn new(store: ObjectStoreRef<K>, to_domain: ToDomain<K, D>, handler: PluginHandlerRef<D>) -> Self {
        Self {
            store,
            to_domain,
            handler,
            requeue_after: DEFAULT_REQUEUE_AFTER,
            metrics: None,
        }
    }

    pub fn with_requeue_after(mut self, requeue_after: Duration) -> Self {
        self.requeue_after = requeue_after;
        self
    }

    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn kind(&self) -> &'static str {
        D::KIND
    }

    pub fn store(&self) -> &ObjectStoreRef<K> {
        &self.store
    }

    pub fn requeue_after(&self) -> Duration {
        self.requeue_after
    }

    /// Run the kind's admission rules against a stored representation
    pub async fn admit(&self, ctx: &Context, obj: &K) -> Result<()> {
        let resource = (self.to_domain)(obj)?;
        self.handler.handle_admission(ctx, &resource).await
    }

    /// Reconcile the object stored under `key`
    pub async fn reconcile(&self, ctx: &Context, key: &ObjectKey) -> Result<ReconcileResult> {
        let started = Instant::now();
        let result = self.reconcile_key(ctx, key).await;

        if let Some(metrics) = &self.metrics {
            match &result {
                Ok((_, outcome)) => metrics.observe(D::KIND, *outcome, started.elapsed()),
                Err(err) => metrics.observe_error(D::KIND, err, started.elapsed()),
            }
        }

        result.map(|(decision, _)| decision)
    }

    async fn reconcile_key(&self, ctx: &Context, key: &ObjectKey) -> Result<(ReconcileResult, Outcome)> {
        let obj = match self.store.get(ctx, key).await {
            Ok(obj) => obj,
            Err(err) if err.is_not_found() => {
                debug!(kind = D::KIND, key = %key, "Object is gone, nothing to reconcile");
                return Ok((ReconcileResult::done(), Outcome::Skipped));
            }
            Err(err) => return Err(err),
        };

        let mut resource = match (self.to_domain)(&obj) {
            Ok(resource) => resource,
            Err(err) => {
                // Retrying cannot fix a malformed object; wait for it to change
                error!(kind = D::KIND, key = %key, error = %err, "Failed to convert object");
                self.record_conversion_failure(ctx, key, &err).await;
                return Ok((ReconcileResult::done(), Outcome::Invalid));
            }
        };

        if self.handler.handle_reconcile(ctx, &mut resource).await? {
            debug!(
                kind = D::KIND,
                key = %key,
                after = ?self.requeue_after,
                "Requeue requested"
            );
            Ok((ReconcileResult::requeue(self.requeue_after), Outcome::Requeue))
        } else {
            info!(kind = D::KIND, key = %key, "Reconciled");
            Ok((ReconcileResult::done(), Outcome::Done))
        }
    }
}

impl<K, D> GenericController<K, D>
where
    K: Clone + Send + Sync + 'static,
    D: DomainResource,
{
    /// Leave the conversion error on the stored object's status
    async fn record_conversion_failure(&self, ctx: &Context, key: &ObjectKey, err: &Error) {
        let condition = Condition {
            state: ResourceState::Error.to_string(),
            reason: CONVERSION_FAILED_REASON.to_string(),
            message: err.to_string(),
            last_transition_at: Utc::now(),
        };
        match self.store.record_condition(ctx, key, &condition).await {
            Ok(true) => debug!(kind = D::KIND, key = %key, "Recorded conversion failure"),
            Ok(false) => {}
            Err(record_err) => warn!(
                kind = D::KIND,
                key = %key,
                error = %record_err,
                "Failed to record conversion failure"
            ),
        }
    }
}

impl<K, D> std::fmt::Debug for GenericController<K, D>
where
    D: DomainResource,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericController")
            .field("kind", &D::KIND)
            .field("requeue_after", &self.requeue_after)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{self, labels};
    use crate::delegator::testing::RecordingPlugin;
    use crate::delegator::BlockStoragePluginHandler;
    use crate::domain::{self, Scope, Stateful};
    use crate::error::Error;
    use crate::store::{MappedRepository, MemoryObjectStore, ObjectStore};
    use assert_matches::assert_matches;
    use kube::ResourceExt;
    use prometheus::Registry;
    use std::sync::Arc;

    type BlockController = GenericController<crd::BlockStorage, domain::BlockStorage>;

    struct Fixture {
        store: Arc<MemoryObjectStore<crd::BlockStorage>>,
        plugin: Arc<RecordingPlugin>,
        controller: BlockController,
    }

    fn fixture(requeue_after: Duration) -> Fixture {
        let store = Arc::new(MemoryObjectStore::<crd::BlockStorage>::new());
        let plugin = Arc::new(RecordingPlugin::new());
        let repo = Arc::new(MappedRepository::<crd::BlockStorage>::new(store.clone()));
        let handler = Arc::new(BlockStoragePluginHandler::new(repo, plugin.clone()));
        let controller =
            GenericController::for_mapping(store.clone(), handler).with_requeue_after(requeue_after);
        Fixture {
            store,
            plugin,
            controller,
        }
    }

    fn volume(size_gb: u32) -> crd::BlockStorage {
        let mut obj = crd::BlockStorage::new(
            "vol-1",
            crd::BlockStorageSpec {
                size_gb,
                sku_ref: "skus/rd500".to_string(),
                source_image_ref: None,
            },
        );
        obj.metadata.namespace = Some(labels::namespace_for(&Scope::workspace("acme", "prod")));
        obj.labels_mut()
            .insert(labels::TENANT_LABEL.to_string(), "acme".to_string());
        obj.labels_mut()
            .insert(labels::WORKSPACE_LABEL.to_string(), "prod".to_string());
        obj
    }

    fn key() -> ObjectKey {
        ObjectKey::namespaced("acme--prod", "vol-1")
    }

    async fn state(store: &MemoryObjectStore<crd::BlockStorage>) -> domain::ResourceState {
        let obj = store.get(&Context::new(), &key()).await.unwrap();
        obj.to_domain().unwrap().current_state()
    }

    #[tokio::test]
    async fn test_missing_object_is_done() {
        let f = fixture(Duration::ZERO);
        let result = f.controller.reconcile(&Context::new(), &key()).await.unwrap();
        assert_eq!(result, ReconcileResult::done());
        assert!(f.plugin.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unconvertible_object_is_done() {
        let f = fixture(Duration::ZERO);
        let ctx = Context::new();
        let mut obj = volume(10);
        obj.labels_mut().remove(labels::TENANT_LABEL);
        f.store.create(&ctx, &obj).await.unwrap();

        let result = f.controller.reconcile(&ctx, &key()).await.unwrap();
        assert!(!result.requeue);
        assert!(f.plugin.calls().is_empty());

        let stored = f.store.get(&ctx, &key()).await.unwrap();
        let conditions = stored.status.unwrap().lifecycle.conditions;
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].state, "error");
        assert_eq!(conditions[0].reason, CONVERSION_FAILED_REASON);
        assert!(conditions[0].message.contains("vol-1"));

        // the same failure is not recorded twice
        f.controller.reconcile(&ctx, &key()).await.unwrap();
        let stored = f.store.get(&ctx, &key()).await.unwrap();
        assert_eq!(stored.status.unwrap().lifecycle.conditions.len(), 1);
    }

    #[tokio::test]
    async fn test_requeue_uses_configured_delay() {
        let f = fixture(Duration::from_secs(42));
        let ctx = Context::new();
        f.store.create(&ctx, &volume(10)).await.unwrap();

        let result = f.controller.reconcile(&ctx, &key()).await.unwrap();
        assert_eq!(result, ReconcileResult::requeue(Duration::from_secs(42)));
        assert_eq!(state(&f.store).await, domain::ResourceState::Creating);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let f = fixture(Duration::ZERO);
        let ctx = Context::new();
        f.store.create(&ctx, &volume(10)).await.unwrap();

        // Pending -> Creating without touching the provider
        assert!(f.controller.reconcile(&ctx, &key()).await.unwrap().requeue);
        assert!(f.plugin.calls().is_empty());

        // Creating -> Active
        assert!(!f.controller.reconcile(&ctx, &key()).await.unwrap().requeue);
        assert_eq!(state(&f.store).await, domain::ResourceState::Active);

        // converged
        assert_eq!(
            f.controller.reconcile(&ctx, &key()).await.unwrap(),
            ReconcileResult::done()
        );

        // grow to 20 GB
        let mut obj = f.store.get(&ctx, &key()).await.unwrap();
        obj.spec.size_gb = 20;
        f.store.replace(&ctx, &obj).await.unwrap();

        assert!(f.controller.reconcile(&ctx, &key()).await.unwrap().requeue);
        assert_eq!(state(&f.store).await, domain::ResourceState::Updating);
        assert!(!f.controller.reconcile(&ctx, &key()).await.unwrap().requeue);

        let obj = f.store.get(&ctx, &key()).await.unwrap();
        let resource = obj.to_domain().unwrap();
        assert_eq!(resource.current_state(), domain::ResourceState::Active);
        assert_eq!(resource.observed_size_gb(), 20);

        // soft delete, then the provider cleans up and the object goes away
        f.store.request_deletion(&key()).unwrap();
        assert!(!f.controller.reconcile(&ctx, &key()).await.unwrap().requeue);
        assert!(f.store.is_empty());

        assert_eq!(
            f.plugin.calls(),
            vec!["create", "increase_size", "delete"]
        );
        assert_eq!(
            f.controller.reconcile(&ctx, &key()).await.unwrap(),
            ReconcileResult::done()
        );
    }

    #[tokio::test]
    async fn test_cancelled_context_surfaces() {
        let f = fixture(Duration::ZERO);
        let ctx = Context::new();
        f.store.create(&ctx, &volume(10)).await.unwrap();
        ctx.cancel();

        let result = f.controller.reconcile(&ctx, &key()).await;
        assert_matches!(result, Err(Error::Cancelled));
    }

    #[tokio::test]
    async fn test_admission_through_controller() {
        let f = fixture(Duration::ZERO);
        let ctx = Context::new();
        f.store.create(&ctx, &volume(10)).await.unwrap();
        f.controller.reconcile(&ctx, &key()).await.unwrap();
        f.controller.reconcile(&ctx, &key()).await.unwrap();

        let mut shrunk = f.store.get(&ctx, &key()).await.unwrap();
        shrunk.spec.size_gb = 5;
        assert_matches!(
            f.controller.admit(&ctx, &shrunk).await,
            Err(Error::Admission { .. })
        );
    }

    #[tokio::test]
    async fn test_metrics_record_outcomes() {
        let registry = Registry::new();
        let metrics = ControllerMetrics::register(&registry).unwrap();
        let f = fixture(Duration::ZERO);
        let controller = f.controller.with_metrics(metrics.clone());
        let ctx = Context::new();

        controller.reconcile(&ctx, &key()).await.unwrap();
        f.store.create(&ctx, &volume(10)).await.unwrap();
        controller.reconcile(&ctx, &key()).await.unwrap();
        controller.reconcile(&ctx, &key()).await.unwrap();

        assert_eq!(metrics.reconciles("BlockStorage", Outcome::Skipped), 1);
        assert_eq!(metrics.reconciles("BlockStorage", Outcome::Requeue), 1);
        assert_eq!(metrics.reconciles("BlockStorage", Outcome::Done), 1);

        let mut broken = volume(10);
        broken.metadata.name = Some("vol-2".to_string());
        broken.labels_mut().remove(labels::TENANT_LABEL);
        f.store.create(&ctx, &broken).await.unwrap();
        let broken_key = ObjectKey::namespaced("acme--prod", "vol-2");
        assert!(!controller.reconcile(&ctx, &broken_key).await.unwrap().requeue);

        assert_eq!(metrics.reconciles("BlockStorage", Outcome::Invalid), 1);
        assert_eq!(metrics.reconciles("BlockStorage", Outcome::Skipped), 1);
    }
}
