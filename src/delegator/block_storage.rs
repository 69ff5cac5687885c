//! Block storage handler
//!
//! Transition table, first match wins:
//!
//! | state / condition                        | delegate        | next state   | requeue |
//! |------------------------------------------|-----------------|--------------|---------|
//! | absent or Pending                        | -               | Creating     | yes     |
//! | Creating                                 | `create`        | Active       | no      |
//! | Active, spec size > status size          | -               | Updating     | yes     |
//! | Updating, spec size > status size        | `increase_size` | Active       | no      |
//! | deletion requested or Deleting           | `delete`        | hard delete  | no      |
//! | Error after Creating                     | -               | Creating     | yes     |
//! | Error after Updating, still too small    | -               | Updating     | yes     |
//!
//! Any plugin failure moves the volume to `Error` and requeues.

use super::handler::GenericPluginHandler;
use super::lifecycle::transition;
use super::operation::{delegate, delete_in, update_in, ResourceOperation};
use crate::context::Context;
use crate::domain::{
    BlockStorage, BlockStoragePluginRef, PluginHandler, RepositoryRef, ResourceState, Stateful,
};
use crate::error::{Result, Violation};
use async_trait::async_trait;
use futures::FutureExt;

// =============================================================================
// Admission Rejection Conditions
// =============================================================================

/// Volumes can only grow once provisioning started
pub fn block_decrease_size(_ctx: &Context, resource: &BlockStorage) -> std::result::Result<(), Violation> {
    if resource.current_state() != ResourceState::Creating
        && resource.spec.size_gb < resource.observed_size_gb()
    {
        return Err(Violation::new(format!(
            "decrease storage size is not allowed ({} GB < {} GB)",
            resource.spec.size_gb,
            resource.observed_size_gb()
        )));
    }
    Ok(())
}

/// The SKU is fixed once the volume has been provisioned
pub fn block_change_sku(_ctx: &Context, resource: &BlockStorage) -> std::result::Result<(), Violation> {
    let provisioned = resource.status.as_ref().and_then(|s| s.sku_ref.as_ref());
    match provisioned {
        Some(sku) if *sku != resource.spec.sku_ref && resource.current_state() != ResourceState::Creating => {
            Err(Violation::new(format!(
                "changing the storage sku from {} to {} is not allowed",
                sku, resource.spec.sku_ref
            )))
        }
        _ => Ok(()),
    }
}

// =============================================================================
// Reconciliation Conditions
// =============================================================================

fn is_pending(resource: &BlockStorage) -> bool {
    resource.current_state() == ResourceState::Pending
}

fn want_create(resource: &BlockStorage) -> bool {
    resource.current_state() == ResourceState::Creating
}

fn want_update(resource: &BlockStorage) -> bool {
    resource.current_state() == ResourceState::Active && resource.needs_resize()
}

fn want_increase_size(resource: &BlockStorage) -> bool {
    resource.current_state() == ResourceState::Updating && resource.needs_resize()
}

fn want_delete(resource: &BlockStorage) -> bool {
    resource.metadata.is_deleted() || resource.current_state() == ResourceState::Deleting
}

fn want_retry_create(resource: &BlockStorage) -> bool {
    resource.current_state() == ResourceState::Error
        && resource.previous_state() == Some(ResourceState::Creating)
}

fn want_retry_increase_size(resource: &BlockStorage) -> bool {
    resource.current_state() == ResourceState::Error
        && resource.previous_state() == Some(ResourceState::Updating)
        && resource.needs_resize()
}

fn copy_size(resource: &mut BlockStorage) {
    let size_gb = resource.spec.size_gb;
    resource.status.get_or_insert_with(Default::default).size_gb = size_gb;
}

// =============================================================================
// Handler
// =============================================================================

/// Plugin handler for block storage
pub struct BlockStoragePluginHandler {
    inner: GenericPluginHandler<BlockStorage>,
}

impl BlockStoragePluginHandler {
    pub fn new(repo: RepositoryRef<BlockStorage>, plugin: BlockStoragePluginRef) -> Self {
        let update = update_in(repo.clone());
        let mut inner = GenericPluginHandler::new();

        inner
            .add_rejection_condition(block_decrease_size)
            .add_rejection_condition(block_change_sku);

        let create = plugin.clone();
        let increase = plugin.clone();
        let delete = plugin;

        inner
            .add_operation(
                ResourceOperation::new("pending", is_pending)
                    .on_success(|r| transition(r, ResourceState::Creating))
                    .persist_with(update.clone())
                    .requeue_on_success(true),
            )
            .add_operation(
                ResourceOperation::new("create", want_create)
                    .with_delegate(delegate(move |ctx, r: &mut BlockStorage| {
                        let plugin = create.clone();
                        async move { plugin.create(ctx, r).await }.boxed()
                    }))
                    .on_success(|r| {
                        r.mirror_spec();
                        transition(r, ResourceState::Active);
                    })
                    .persist_with(update.clone()),
            )
            .add_operation(
                ResourceOperation::new("update", want_update)
                    .on_success(|r| transition(r, ResourceState::Updating))
                    .persist_with(update.clone())
                    .requeue_on_success(true),
            )
            .add_operation(
                ResourceOperation::new("increase_size", want_increase_size)
                    .with_delegate(delegate(move |ctx, r: &mut BlockStorage| {
                        let plugin = increase.clone();
                        async move { plugin.increase_size(ctx, r).await }.boxed()
                    }))
                    .on_success(|r| {
                        copy_size(r);
                        transition(r, ResourceState::Active);
                    })
                    .persist_with(update.clone()),
            )
            .add_operation(
                ResourceOperation::new("delete", want_delete)
                    .with_delegate(delegate(move |ctx, r: &mut BlockStorage| {
                        let plugin = delete.clone();
                        async move { plugin.delete(ctx, r).await }.boxed()
                    }))
                    .persist_success(delete_in(repo))
                    .persist_failure(update.clone()),
            )
            .add_operation(
                ResourceOperation::new("retry_create", want_retry_create)
                    .on_success(|r| transition(r, ResourceState::Creating))
                    .persist_with(update.clone())
                    .requeue_on_success(true),
            )
            .add_operation(
                ResourceOperation::new("retry_increase_size", want_retry_increase_size)
                    .on_success(|r| transition(r, ResourceState::Updating))
                    .persist_with(update)
                    .requeue_on_success(true),
            );

        Self { inner }
    }
}

#[async_trait]
impl PluginHandler<BlockStorage> for BlockStoragePluginHandler {
    async fn handle_admission(&self, ctx: &Context, resource: &BlockStorage) -> Result<()> {
        self.inner.admit(ctx, resource)
    }

    async fn handle_reconcile(&self, ctx: &Context, resource: &mut BlockStorage) -> Result<bool> {
        self.inner.reconcile(ctx, resource).await
    }
}
