//! Resource operation composition
//!
//! A [`ResourceOperation`] is one row of a kind's transition table:
//!
//! ```text
//! condition ──▶ delegate ──ok──▶ propagate_success ──▶ set_state_success
//!                   │
//!                   └──err──▶ propagate_failure ──▶ set_state_failure
//! ```
//!
//! Every piece is a small closure, so a kind's state machine is assembled
//! from the same building blocks and each block can be tested on its own.

use super::lifecycle;
use crate::context::Context;
use crate::domain::{DomainResource, RepositoryRef, Stateful};
use crate::error::{Error, PluginError, PluginResult, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{debug, warn};

// =============================================================================
// Building Blocks
// =============================================================================

/// Whether the operation applies to the resource
pub type Condition<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Call into the CSP plugin
pub type Delegate<T> =
    Box<dyn for<'a> Fn(&'a Context, &'a mut T) -> BoxFuture<'a, PluginResult> + Send + Sync>;

/// In-memory mutation after the plugin succeeded
pub type PropagateSuccess<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// In-memory mutation after the plugin failed
pub type PropagateFailure<T> = Box<dyn Fn(&mut T, &PluginError) + Send + Sync>;

/// Persist the outcome, usually through the repository
pub type SetState<T> =
    Arc<dyn for<'a> Fn(&'a Context, &'a mut T) -> BoxFuture<'a, Result<()>> + Send + Sync>;

pub fn delegate<T, F>(f: F) -> Delegate<T>
where
    F: for<'a> Fn(&'a Context, &'a mut T) -> BoxFuture<'a, PluginResult> + Send + Sync + 'static,
{
    Box::new(f)
}

/// Skip the plugin, the transition is bookkeeping only
pub fn bypass<T: Send + 'static>() -> Delegate<T> {
    delegate(|_ctx, _resource| async { Ok::<(), PluginError>(()) }.boxed())
}

pub fn set_state<T, F>(f: F) -> SetState<T>
where
    F: for<'a> Fn(&'a Context, &'a mut T) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn noop_set_state<T: Send + 'static>() -> SetState<T> {
    set_state(|_ctx, _resource| async { Ok::<(), Error>(()) }.boxed())
}

/// Persist the resource and adopt the stored version
pub fn update_in<T: DomainResource>(repo: RepositoryRef<T>) -> SetState<T> {
    set_state(move |ctx, resource| {
        let repo = repo.clone();
        async move {
            let updated = repo.update(ctx, resource).await?;
            *resource = updated;
            Ok::<(), Error>(())
        }
        .boxed()
    })
}

/// Remove the resource from the store
pub fn delete_in<T: DomainResource>(repo: RepositoryRef<T>) -> SetState<T> {
    set_state(move |ctx, resource| {
        let repo = repo.clone();
        async move { repo.delete(ctx, resource).await }.boxed()
    })
}

// =============================================================================
// Resource Operation
// =============================================================================

/// One guarded transition of a resource's lifecycle
pub struct ResourceOperation<T> {
    name: &'static str,
    condition: Condition<T>,
    delegate: Delegate<T>,
    propagate_success: PropagateSuccess<T>,
    set_state_success: SetState<T>,
    propagate_failure: PropagateFailure<T>,
    set_state_failure: SetState<T>,
    requeue_on_success: bool,
}

impl<T: Stateful> ResourceOperation<T> {
    /// An operation that bypasses the plugin and persists nothing until
    /// configured otherwise. Failures move the resource to `Error`.
    pub fn new<F>(name: &'static str, condition: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            name,
            condition: Box::new(condition),
            delegate: bypass(),
            propagate_success: Box::new(|_: &mut T| {}),
            set_state_success: noop_set_state(),
            propagate_failure: Box::new(lifecycle::fail::<T>),
            set_state_failure: noop_set_state(),
            requeue_on_success: false,
        }
    }

    pub fn with_delegate(mut self, delegate: Delegate<T>) -> Self {
        self.delegate = delegate;
        self
    }

    pub fn on_success<F>(mut self, propagate: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.propagate_success = Box::new(propagate);
        self
    }

    pub fn on_failure<F>(mut self, propagate: F) -> Self
    where
        F: Fn(&mut T, &PluginError) + Send + Sync + 'static,
    {
        self.propagate_failure = Box::new(propagate);
        self
    }

    pub fn persist_success(mut self, set_state: SetState<T>) -> Self {
        self.set_state_success = set_state;
        self
    }

    pub fn persist_failure(mut self, set_state: SetState<T>) -> Self {
        self.set_state_failure = set_state;
        self
    }

    /// Use the same persistence for both outcomes
    pub fn persist_with(self, set_state: SetState<T>) -> Self {
        self.persist_success(set_state.clone())
            .persist_failure(set_state)
    }

    pub fn requeue_on_success(mut self, requeue: bool) -> Self {
        self.requeue_on_success = requeue;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn applies_to(&self, resource: &T) -> bool {
        (self.condition)(resource)
    }

    /// Run the operation. Returns whether the resource should be requeued.
    ///
    /// # Panics
    ///
    /// If the delegate changed the lifecycle state. Only the engine may move
    /// a resource between states.
    pub async fn execute(&self, ctx: &Context, resource: &mut T) -> Result<bool> {
        let before = resource.raw_state();
        let outcome = ctx.run((self.delegate)(ctx, resource)).await?;
        let after = resource.raw_state();

        if before != after {
            panic!(
                "{} {}: delegate of '{}' changed the lifecycle state from {:?} to {:?}",
                T::KIND,
                resource.name(),
                self.name,
                before,
                after
            );
        }

        match outcome {
            Ok(()) => {
                debug!(
                    kind = T::KIND,
                    name = %resource.name(),
                    operation = self.name,
                    "Delegate succeeded"
                );
                (self.propagate_success)(resource);
                ctx.run((self.set_state_success)(ctx, resource)).await??;
                Ok(self.requeue_on_success)
            }
            Err(PluginError::StillProcessing) => {
                debug!(
                    kind = T::KIND,
                    name = %resource.name(),
                    operation = self.name,
                    "Delegate still processing"
                );
                Ok(true)
            }
            Err(err) => {
                warn!(
                    kind = T::KIND,
                    name = %resource.name(),
                    operation = self.name,
                    error = %err,
                    "Delegate failed"
                );
                (self.propagate_failure)(resource, &err);
                ctx.run((self.set_state_failure)(ctx, resource)).await??;
                Ok(true)
            }
        }
    }
}

impl<T> std::fmt::Debug for ResourceOperation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceOperation")
            .field("name", &self.name)
            .field("requeue_on_success", &self.requeue_on_success)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegator::testing::FakeRepository;
    use crate::domain::{Metadata, ResourceState, Workspace};
    use assert_matches::assert_matches;

    fn workspace() -> Workspace {
        Workspace::new(Metadata::new("ws-1", "acme")).with_state(ResourceState::Creating)
    }

    fn failing(message: &'static str) -> Delegate<Workspace> {
        delegate(move |_ctx, _ws| {
            async move { Err::<(), _>(PluginError::failed("dummy", "create", message)) }.boxed()
        })
    }

    #[tokio::test]
    async fn test_success_path() {
        let repo = Arc::new(FakeRepository::<Workspace>::new());
        let op = ResourceOperation::new("create", |ws: &Workspace| {
            ws.current_state() == ResourceState::Creating
        })
        .on_success(|ws| lifecycle::transition(ws, ResourceState::Active))
        .persist_with(update_in(repo.clone()));

        let mut ws = workspace();
        assert!(op.applies_to(&ws));
        let requeue = op.execute(&Context::new(), &mut ws).await.unwrap();

        assert!(!requeue);
        assert_eq!(ws.current_state(), ResourceState::Active);
        assert_eq!(repo.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_failure_path_records_error() {
        let repo = Arc::new(FakeRepository::<Workspace>::new());
        let op = ResourceOperation::new("create", |_: &Workspace| true)
            .with_delegate(failing("no capacity"))
            .persist_with(update_in(repo.clone()));

        let mut ws = workspace();
        let requeue = op.execute(&Context::new(), &mut ws).await.unwrap();

        assert!(requeue);
        assert_eq!(ws.current_state(), ResourceState::Error);
        assert_eq!(
            ws.conditions().last().unwrap().message,
            "dummy create failed: no capacity"
        );
        assert_eq!(repo.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_still_processing_changes_nothing() {
        let repo = Arc::new(FakeRepository::<Workspace>::new());
        let op = ResourceOperation::new("delete", |_: &Workspace| true)
            .with_delegate(delegate(|_ctx, _ws| {
                async { Err::<(), _>(PluginError::StillProcessing) }.boxed()
            }))
            .persist_with(delete_in(repo.clone()));

        let mut ws = workspace();
        let before = ws.clone();
        assert!(op.execute(&Context::new(), &mut ws).await.unwrap());
        assert_eq!(ws, before);
        assert!(repo.deletes().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let repo = Arc::new(FakeRepository::<Workspace>::new());
        repo.fail_next(Error::Unavailable("etcd down".into()));
        let op = ResourceOperation::new("create", |_: &Workspace| true)
            .persist_with(update_in(repo.clone()));

        let result = op.execute(&Context::new(), &mut workspace()).await;
        assert_matches!(result, Err(Error::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_cancelled_before_delegate() {
        let ctx = Context::new();
        ctx.cancel();
        let op = ResourceOperation::new("create", |_: &Workspace| true);
        let result = op.execute(&ctx, &mut workspace()).await;
        assert_matches!(result, Err(Error::Cancelled));
    }

    #[tokio::test]
    #[should_panic(expected = "changed the lifecycle state")]
    async fn test_delegate_changing_state_is_fatal() {
        let op = ResourceOperation::new("create", |_: &Workspace| true).with_delegate(delegate(
            |_ctx, ws: &mut Workspace| {
                lifecycle::transition(ws, ResourceState::Active);
                async { Ok::<(), PluginError>(()) }.boxed()
            },
        ));
        let _ = op.execute(&Context::new(), &mut workspace()).await;
    }
}
