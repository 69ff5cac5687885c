//! Workspace handler
//!
//! Workspaces have no mutable provider-side attributes, so the table only
//! covers provisioning, deletion and the retry after a failed create.

use super::handler::GenericPluginHandler;
use super::lifecycle::transition;
use super::operation::{delegate, delete_in, update_in, ResourceOperation};
use crate::context::Context;
use crate::domain::{
    PluginHandler, RepositoryRef, ResourceState, Stateful, Workspace, WorkspacePluginRef,
};
use crate::error::Result;
use async_trait::async_trait;
use futures::FutureExt;

fn is_pending(resource: &Workspace) -> bool {
    resource.current_state() == ResourceState::Pending
}

fn want_create(resource: &Workspace) -> bool {
    resource.current_state() == ResourceState::Creating
}

fn want_delete(resource: &Workspace) -> bool {
    resource.metadata.is_deleted() || resource.current_state() == ResourceState::Deleting
}

fn want_retry_create(resource: &Workspace) -> bool {
    resource.current_state() == ResourceState::Error
        && resource.previous_state() == Some(ResourceState::Creating)
}

/// Plugin handler for workspaces
pub struct WorkspacePluginHandler {
    inner: GenericPluginHandler<Workspace>,
}

impl WorkspacePluginHandler {
    pub fn new(repo: RepositoryRef<Workspace>, plugin: WorkspacePluginRef) -> Self {
        let update = update_in(repo.clone());
        let create = plugin.clone();
        let delete = plugin;

        let mut inner = GenericPluginHandler::new();
        inner
            .add_operation(
                ResourceOperation::new("pending", is_pending)
                    .on_success(|r| transition(r, ResourceState::Creating))
                    .persist_with(update.clone())
                    .requeue_on_success(true),
            )
            .add_operation(
                ResourceOperation::new("create", want_create)
                    .with_delegate(delegate(move |ctx, r: &mut Workspace| {
                        let plugin = create.clone();
                        async move { plugin.create(ctx, r).await }.boxed()
                    }))
                    .on_success(|r| transition(r, ResourceState::Active))
                    .persist_with(update.clone()),
            )
            .add_operation(
                ResourceOperation::new("delete", want_delete)
                    .with_delegate(delegate(move |ctx, r: &mut Workspace| {
                        let plugin = delete.clone();
                        async move { plugin.delete(ctx, r).await }.boxed()
                    }))
                    .persist_success(delete_in(repo))
                    .persist_failure(update.clone()),
            )
            .add_operation(
                ResourceOperation::new("retry_create", want_retry_create)
                    .on_success(|r| transition(r, ResourceState::Creating))
                    .persist_with(update)
                    .requeue_on_success(true),
            );

        Self { inner }
    }
}

#[async_trait]
impl PluginHandler<Workspace> for WorkspacePluginHandler {
    async fn handle_admission(&self, ctx: &Context, resource: &Workspace) -> Result<()> {
        self.inner.admit(ctx, resource)
    }

    async fn handle_reconcile(&self, ctx: &Context, resource: &mut Workspace) -> Result<bool> {
        self.inner.reconcile(ctx, resource).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegator::lifecycle::fail;
    use crate::delegator::testing::{FakeRepository, RecordingPlugin};
    use crate::domain::Metadata;
    use crate::error::PluginError;
    use chrono::Utc;
    use std::sync::Arc;

    fn fixture() -> (
        Arc<FakeRepository<Workspace>>,
        Arc<RecordingPlugin>,
        WorkspacePluginHandler,
    ) {
        let repo = Arc::new(FakeRepository::new());
        let plugin = Arc::new(RecordingPlugin::new());
        let handler = WorkspacePluginHandler::new(repo.clone(), plugin.clone());
        (repo, plugin, handler)
    }

    fn workspace() -> Workspace {
        Workspace::new(Metadata::new("ws-1", "acme").in_region("eu-central-1"))
    }

    #[tokio::test]
    async fn test_provisioning_takes_two_passes() {
        let (repo, plugin, handler) = fixture();
        let ctx = Context::new();
        let mut ws = workspace();

        assert!(handler.handle_reconcile(&ctx, &mut ws).await.unwrap());
        assert_eq!(ws.current_state(), ResourceState::Creating);

        assert!(!handler.handle_reconcile(&ctx, &mut ws).await.unwrap());
        assert_eq!(ws.current_state(), ResourceState::Active);
        assert_eq!(plugin.calls(), vec!["create"]);
        assert_eq!(repo.updates().len(), 2);

        // converged
        assert!(!handler.handle_reconcile(&ctx, &mut ws).await.unwrap());
        assert_eq!(repo.writes(), 2);
    }

    #[tokio::test]
    async fn test_failed_create_is_retried() {
        let (_repo, plugin, handler) = fixture();
        let ctx = Context::new();
        plugin.respond(Err(PluginError::failed("dummy", "create", "region offline")));
        let mut ws = workspace();
        transition(&mut ws, ResourceState::Creating);

        assert!(handler.handle_reconcile(&ctx, &mut ws).await.unwrap());
        assert_eq!(ws.current_state(), ResourceState::Error);

        assert!(handler.handle_reconcile(&ctx, &mut ws).await.unwrap());
        assert_eq!(ws.current_state(), ResourceState::Creating);

        assert!(!handler.handle_reconcile(&ctx, &mut ws).await.unwrap());
        assert_eq!(ws.current_state(), ResourceState::Active);
        assert_eq!(plugin.calls(), vec!["create", "create"]);
    }

    #[tokio::test]
    async fn test_error_after_active_is_left_alone() {
        let (repo, plugin, handler) = fixture();
        let mut ws = workspace();
        transition(&mut ws, ResourceState::Active);
        fail(&mut ws, &PluginError::failed("dummy", "delete", "busy"));

        assert!(!handler.handle_reconcile(&Context::new(), &mut ws).await.unwrap());
        assert!(plugin.calls().is_empty());
        assert_eq!(repo.writes(), 0);
    }

    #[tokio::test]
    async fn test_deletion_marker_triggers_delete() {
        let (repo, plugin, handler) = fixture();
        let mut ws = workspace().with_state(ResourceState::Active);
        ws.metadata.deleted_at = Some(Utc::now());

        assert!(!handler.handle_reconcile(&Context::new(), &mut ws).await.unwrap());
        assert_eq!(plugin.calls(), vec!["delete"]);
        assert_eq!(repo.deletes().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_delete_records_error() {
        let (repo, plugin, handler) = fixture();
        plugin.respond(Err(PluginError::failed("dummy", "delete", "still attached")));
        let mut ws = workspace().with_state(ResourceState::Deleting);

        assert!(handler.handle_reconcile(&Context::new(), &mut ws).await.unwrap());
        assert_eq!(ws.current_state(), ResourceState::Error);
        assert!(repo.deletes().is_empty());
        assert_eq!(repo.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_admission_accepts_everything() {
        let (_repo, _plugin, handler) = fixture();
        let ws = workspace().with_property("tier", "gold");
        assert!(handler.handle_admission(&Context::new(), &ws).await.is_ok());
    }
}
