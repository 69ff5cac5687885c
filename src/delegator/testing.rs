//! Test doubles for handler and controller tests

use crate::context::Context;
use crate::domain::{
    BlockStorage, BlockStoragePlugin, DomainResource, ListPage, ListParams, Repository,
    ResourceRef, ResourceState, Stateful, Workspace, WorkspacePlugin,
};
use crate::error::{Error, PluginResult, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

// =============================================================================
// Repository
// =============================================================================

/// Repository that records writes
pub struct FakeRepository<T> {
    updates: Mutex<Vec<T>>,
    deletes: Mutex<Vec<T>>,
    fail_next: Mutex<Option<Error>>,
    version: AtomicU64,
}

impl<T: DomainResource> FakeRepository<T> {
    pub fn new() -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// Make the next write fail with `err`
    pub fn fail_next(&self, err: Error) {
        *self.fail_next.lock() = Some(err);
    }

    pub fn updates(&self) -> Vec<T> {
        self.updates.lock().clone()
    }

    pub fn deletes(&self) -> Vec<T> {
        self.deletes.lock().clone()
    }

    pub fn writes(&self) -> usize {
        self.updates.lock().len() + self.deletes.lock().len()
    }

    fn check(&self) -> Result<()> {
        match self.fail_next.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stamp(&self, resource: &T) -> T {
        let mut stored = resource.clone();
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        stored.metadata_mut().resource_version = version.to_string();
        stored
    }
}

#[async_trait]
impl<T: DomainResource> Repository<T> for FakeRepository<T> {
    async fn list(&self, _ctx: &Context, _params: &ListParams) -> Result<ListPage<T>> {
        Ok(ListPage {
            items: self.updates(),
            next_skip_token: None,
        })
    }

    async fn load(&self, _ctx: &Context, reference: &ResourceRef) -> Result<T> {
        self.updates
            .lock()
            .iter()
            .rev()
            .find(|r| r.name() == reference.name)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                kind: T::KIND.to_string(),
                name: reference.to_string(),
            })
    }

    async fn create(&self, ctx: &Context, resource: &T) -> Result<T> {
        self.update(ctx, resource).await
    }

    async fn update(&self, _ctx: &Context, resource: &T) -> Result<T> {
        self.check()?;
        let stored = self.stamp(resource);
        self.updates.lock().push(stored.clone());
        Ok(stored)
    }

    async fn delete(&self, _ctx: &Context, resource: &T) -> Result<()> {
        self.check()?;
        self.deletes.lock().push(resource.clone());
        Ok(())
    }
}

// =============================================================================
// Plugins
// =============================================================================

/// Plugin that records calls and replays scripted results
#[derive(Default)]
pub struct RecordingPlugin {
    calls: Mutex<Vec<&'static str>>,
    responses: Mutex<VecDeque<PluginResult>>,
    tamper: AtomicBool,
}

impl RecordingPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next call; unscripted calls succeed
    pub fn respond(&self, result: PluginResult) {
        self.responses.lock().push_back(result);
    }

    /// Make every call illegally change the lifecycle state
    pub fn tamper_with_state(&self) {
        self.tamper.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    fn record<T: Stateful>(&self, operation: &'static str, resource: &mut T) -> PluginResult {
        self.calls.lock().push(operation);
        if self.tamper.load(Ordering::SeqCst) {
            resource.lifecycle_mut().state = Some(ResourceState::Suspended);
        }
        self.responses.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl BlockStoragePlugin for RecordingPlugin {
    async fn create(&self, _ctx: &Context, resource: &mut BlockStorage) -> PluginResult {
        self.record("create", resource)
    }

    async fn delete(&self, _ctx: &Context, resource: &mut BlockStorage) -> PluginResult {
        self.record("delete", resource)
    }

    async fn increase_size(&self, _ctx: &Context, resource: &mut BlockStorage) -> PluginResult {
        self.record("increase_size", resource)
    }
}

#[async_trait]
impl WorkspacePlugin for RecordingPlugin {
    async fn create(&self, _ctx: &Context, resource: &mut Workspace) -> PluginResult {
        self.record("create", resource)
    }

    async fn delete(&self, _ctx: &Context, resource: &mut Workspace) -> PluginResult {
        self.record("delete", resource)
    }
}
