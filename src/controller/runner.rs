//! Drivers that feed object keys to a [`GenericController`]
//!
//! - [`KubeDriver`]: kube-runtime `Controller`, watch driven
//! - [`PollingDriver`]: periodic sweeps over any object store, used in
//!   standalone mode and tests

use super::{GenericController, ReconcileResult};
use crate::context::Context;
use crate::domain::DomainResource;
use crate::error::{Error, ErrorAction, Result};
use crate::store::{ListOptions, ObjectKey};
use dashmap::DashMap;
use futures::StreamExt;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Resource};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound of a single reconcile, store and plugin calls included
pub const DEFAULT_RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// Backoff
// =============================================================================

/// Per-object exponential backoff for failed reconciles
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: DashMap<ObjectKey, u32>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: DashMap::new(),
        }
    }

    /// Delay before the next attempt; each call counts as one more failure
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let mut failures = self.failures.entry(key.clone()).or_insert(0);
        let count = *failures;
        *failures = count.saturating_add(1);
        self.base.saturating_mul(1 << count.min(16)).min(self.max)
    }

    pub fn reset(&self, key: &ObjectKey) {
        self.failures.remove(key);
    }

    /// Forget every key not in `live`
    pub fn retain(&self, live: &HashSet<ObjectKey>) {
        self.failures.retain(|key, _| live.contains(key));
    }

    pub fn failures(&self, key: &ObjectKey) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }

    /// When to retry after `err`, `None` if only a change of the object helps
    pub fn retry_delay(&self, err: &Error, key: &ObjectKey) -> Option<Duration> {
        match err.action() {
            ErrorAction::RequeueWithBackoff => Some(self.next_delay(key)),
            ErrorAction::RequeueAfter(delay) => Some(delay),
            ErrorAction::NoRequeue => None,
        }
    }
}

// =============================================================================
// Kubernetes Driver
// =============================================================================

/// Runs a controller off a kube-runtime watch
pub struct KubeDriver<K, D> {
    controller: Arc<GenericController<K, D>>,
    backoff: Backoff,
    reconcile_timeout: Duration,
    root: Context,
}

impl<K, D> KubeDriver<K, D>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    D: DomainResource,
{
    pub fn new(controller: Arc<GenericController<K, D>>, root: Context) -> Self {
        Self {
            controller,
            backoff: Backoff::default(),
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            root,
        }
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Watch `api` until the root context is cancelled
    pub async fn run(self: Arc<Self>, api: Api<K>) {
        let kind = self.controller.kind();
        info!(kind, "Starting controller");

        let stream = Controller::new(api, watcher::Config::default())
            .shutdown_on_signal()
            .run(Self::reconcile, Self::error_policy, self.clone())
            .for_each(|result| async move {
                match result {
                    Ok((obj, action)) => debug!(kind, object = %obj, ?action, "Reconciliation completed"),
                    Err(err) => warn!(kind, error = %err, "Reconciliation error"),
                }
            });

        tokio::select! {
            _ = stream => info!(kind, "Controller stream ended"),
            _ = self.root.token().cancelled() => info!(kind, "Controller cancelled"),
        }
    }

    async fn reconcile(obj: Arc<K>, driver: Arc<Self>) -> Result<Action> {
        let key = ObjectKey::of(obj.as_ref());
        let ctx = driver.root.child().with_timeout(driver.reconcile_timeout);
        let result = driver.controller.reconcile(&ctx, &key).await?;
        driver.backoff.reset(&key);
        Ok(result.into_action())
    }

    fn error_policy(obj: Arc<K>, err: &Error, driver: Arc<Self>) -> Action {
        let key = ObjectKey::of(obj.as_ref());
        match driver.backoff.retry_delay(err, &key) {
            Some(delay) => {
                warn!(
                    kind = driver.controller.kind(),
                    key = %key,
                    error = %err,
                    retry_in = ?delay,
                    "Reconcile failed"
                );
                Action::requeue(delay)
            }
            None => {
                error!(
                    kind = driver.controller.kind(),
                    key = %key,
                    error = %err,
                    "Reconcile failed permanently, waiting for a change"
                );
                Action::await_change()
            }
        }
    }
}

// =============================================================================
// Polling Driver
// =============================================================================

/// Counters of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub seen: usize,
    pub requeued: usize,
    pub failed: usize,
    /// Backing off from an earlier failure
    pub deferred: usize,
}

impl SweepReport {
    pub fn settled(&self) -> bool {
        self.requeued == 0 && self.failed == 0
    }
}

/// Reconciles every stored object once per interval
///
/// Requeue delays are not honoured individually: a requeued object is simply
/// looked at again on the next sweep. Failed objects are deferred by the
/// backoff.
pub struct PollingDriver<K, D> {
    controller: Arc<GenericController<K, D>>,
    interval: Duration,
    page_size: usize,
    reconcile_timeout: Duration,
    backoff: Backoff,
    not_before: DashMap<ObjectKey, Instant>,
}

impl<K, D> PollingDriver<K, D>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    D: DomainResource,
{
    pub fn new(controller: Arc<GenericController<K, D>>, interval: Duration) -> Self {
        Self {
            controller,
            interval,
            page_size: 100,
            reconcile_timeout: DEFAULT_RECONCILE_TIMEOUT,
            backoff: Backoff::default(),
            not_before: DashMap::new(),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_reconcile_timeout(mut self, timeout: Duration) -> Self {
        self.reconcile_timeout = timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sweep until `ctx` is cancelled
    pub async fn run(&self, ctx: &Context) -> Result<()> {
        let kind = self.controller.kind();
        info!(kind, interval = ?self.interval, "Starting polling driver");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ctx.token().cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.sweep(ctx).await {
                Ok(report) => debug!(kind, ?report, "Sweep finished"),
                Err(Error::Cancelled) => break,
                Err(err) => warn!(kind, error = %err, "Sweep failed"),
            }
        }

        info!(kind, "Polling driver stopped");
        Ok(())
    }

    /// Sweep back to back until nothing asks for a requeue
    ///
    /// Returns the number of sweeps, or `None` if `max_sweeps` was not enough.
    pub async fn settle(&self, ctx: &Context, max_sweeps: usize) -> Result<Option<usize>> {
        for sweep in 1..=max_sweeps {
            if self.sweep(ctx).await?.settled() {
                return Ok(Some(sweep));
            }
        }
        Ok(None)
    }

    /// Reconcile every stored object once
    pub async fn sweep(&self, ctx: &Context) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut live = HashSet::new();
        let mut opts = ListOptions {
            limit: Some(self.page_size),
            ..Default::default()
        };

        loop {
            let page = self.controller.store().list(ctx, &opts).await?;
            for obj in &page.items {
                let key = ObjectKey::of(obj);
                report.seen += 1;
                live.insert(key.clone());
                self.visit(ctx, key, &mut report).await?;
            }

            match page.continue_token {
                Some(token) => opts.continue_token = Some(token),
                None => break,
            }
        }

        // keys that failed and were deleted since are never listed again
        self.not_before.retain(|key, _| live.contains(key));
        self.backoff.retain(&live);

        Ok(report)
    }

    async fn visit(&self, ctx: &Context, key: ObjectKey, report: &mut SweepReport) -> Result<()> {
        if let Some(deadline) = self.not_before.get(&key).map(|d| *d) {
            if Instant::now() < deadline {
                report.deferred += 1;
                return Ok(());
            }
        }

        let child = ctx.child().with_timeout(self.reconcile_timeout);
        match self.controller.reconcile(&child, &key).await {
            Ok(ReconcileResult { requeue, .. }) => {
                self.backoff.reset(&key);
                self.not_before.remove(&key);
                if requeue {
                    report.requeued += 1;
                }
                Ok(())
            }
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                report.failed += 1;
                let delay = self
                    .backoff
                    .retry_delay(&err, &key)
                    .unwrap_or_else(|| self.controller.requeue_after());
                warn!(
                    kind = self.controller.kind(),
                    key = %key,
                    error = %err,
                    retry_in = ?delay,
                    "Reconcile failed"
                );
                self.not_before.insert(key, Instant::now() + delay);
                Ok(())
            }
        }
    }
}

/// Cancel `token` on SIGINT/SIGTERM
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            token.cancel();
        }
    });
}
