//! Domain repository over an object store

use super::{ListOptions, ObjectKey, ObjectStoreRef};
use crate::context::Context;
use crate::crd::labels::namespace_for;
use crate::crd::DomainMapping;
use crate::domain::{DomainResource, ListPage, ListParams, Repository, ResourceRef};
use crate::error::Result;
use async_trait::async_trait;
use tracing::debug;

/// [`Repository`] of `K::Domain` persisted as `K` objects
pub struct MappedRepository<K: DomainMapping> {
    store: ObjectStoreRef<K>,
}

impl<K: DomainMapping> MappedRepository<K> {
    pub fn new(store: ObjectStoreRef<K>) -> Self {
        Self { store }
    }

    fn key_of(reference: &ResourceRef) -> ObjectKey {
        ObjectKey::namespaced(namespace_for(&reference.scope), reference.name.clone())
    }
}

impl<K: DomainMapping> Clone for MappedRepository<K> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

#[async_trait]
impl<K: DomainMapping> Repository<K::Domain> for MappedRepository<K> {
    async fn list(&self, ctx: &Context, params: &ListParams) -> Result<ListPage<K::Domain>> {
        let opts = ListOptions {
            namespace: params.scope.as_ref().map(namespace_for),
            label_selector: params.label_selector.clone(),
            limit: params.limit,
            continue_token: params.skip_token.clone(),
        };
        let list = self.store.list(ctx, &opts).await?;
        ListPage {
            items: list.items,
            next_skip_token: list.continue_token,
        }
        .try_map(|obj| obj.to_domain())
    }

    async fn load(&self, ctx: &Context, reference: &ResourceRef) -> Result<K::Domain> {
        self.store.get(ctx, &Self::key_of(reference)).await?.to_domain()
    }

    async fn create(&self, ctx: &Context, resource: &K::Domain) -> Result<K::Domain> {
        debug!(kind = K::Domain::KIND, name = %resource.name(), "Creating resource");
        self.store
            .create(ctx, &K::from_domain(resource))
            .await?
            .to_domain()
    }

    async fn update(&self, ctx: &Context, resource: &K::Domain) -> Result<K::Domain> {
        debug!(
            kind = K::Domain::KIND,
            name = %resource.name(),
            version = %resource.metadata().resource_version,
            "Updating resource"
        );
        self.store
            .replace(ctx, &K::from_domain(resource))
            .await?
            .to_domain()
    }

    async fn delete(&self, ctx: &Context, resource: &K::Domain) -> Result<()> {
        let metadata = resource.metadata();
        debug!(
            kind = K::Domain::KIND,
            name = %resource.name(),
            version = %metadata.resource_version,
            "Deleting resource"
        );
        // an empty version never matches a stored object
        self.store
            .delete(
                ctx,
                &Self::key_of(&metadata.reference()),
                Some(metadata.resource_version.as_str()),
            )
            .await
    }
}
