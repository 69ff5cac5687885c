//! In-memory object store
//!
//! Mimics the API server semantics the engine relies on: monotonically
//! increasing resource versions, conflict detection on stale writes, a
//! soft-delete marker and paginated label-selector listing.

use super::{conditions_with, stale_version, ListOptions, ObjectKey, ObjectList, ObjectStore, Selector};
use crate::context::Context;
use crate::crd::Condition;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{Resource, ResourceExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Object store backed by a sorted map
pub struct MemoryObjectStore<K> {
    objects: RwLock<BTreeMap<ObjectKey, K>>,
    version: AtomicU64,
}

impl<K> Default for MemoryObjectStore<K> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            version: AtomicU64::new(0),
        }
    }
}

impl<K> MemoryObjectStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Every stored key, in list order
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.objects.read().keys().cloned().collect()
    }

    /// Set the soft-delete marker, as the API server does for an object
    /// guarded by a finalizer
    pub fn request_deletion(&self, key: &ObjectKey) -> Result<()> {
        let mut objects = self.objects.write();
        let obj = objects.get_mut(key).ok_or_else(|| not_found::<K>(key))?;
        if obj.meta().deletion_timestamp.is_none() {
            obj.meta_mut().deletion_timestamp = Some(Time(Utc::now()));
            obj.meta_mut().resource_version = Some(self.next_version());
            debug!(kind = %K::kind(&()), key = %key, "Marked object for deletion");
        }
        Ok(())
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn key_of(obj: &K) -> Result<ObjectKey> {
        if obj.meta().name.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::Validation(format!(
                "{} without metadata.name",
                K::kind(&())
            )));
        }
        Ok(ObjectKey::of(obj))
    }
}

fn not_found<K: Resource<DynamicType = ()>>(key: &ObjectKey) -> Error {
    Error::NotFound {
        kind: K::kind(&()).to_string(),
        name: key.to_string(),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryObjectStore<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, ctx: &Context, key: &ObjectKey) -> Result<K> {
        ctx.check()?;
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| not_found::<K>(key))
    }

    async fn list(&self, ctx: &Context, opts: &ListOptions) -> Result<ObjectList<K>> {
        ctx.check()?;
        let selector = Selector::parse_opt(opts.label_selector.as_deref())?;
        let start = match &opts.continue_token {
            Some(token) => Bound::Excluded(ObjectKey::parse(token)),
            None => Bound::Unbounded,
        };
        let limit = opts.limit.filter(|l| *l > 0).unwrap_or(usize::MAX);

        let objects = self.objects.read();
        let mut matching = objects
            .range((start, Bound::Unbounded))
            .filter(|(key, _)| opts.namespace.is_none() || key.namespace == opts.namespace)
            .filter(|(_, obj)| selector.matches(obj.labels()));

        let items: Vec<(ObjectKey, K)> = matching
            .by_ref()
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let has_more = matching.next().is_some();

        let continue_token = if has_more {
            items.last().map(|(key, _)| key.to_string())
        } else {
            None
        };

        Ok(ObjectList {
            items: items.into_iter().map(|(_, obj)| obj).collect(),
            continue_token,
        })
    }

    async fn create(&self, ctx: &Context, obj: &K) -> Result<K> {
        ctx.check()?;
        let key = Self::key_of(obj)?;
        let mut objects = self.objects.write();
        if objects.contains_key(&key) {
            return Err(Error::AlreadyExists {
                kind: K::kind(&()).to_string(),
                name: key.to_string(),
            });
        }

        let mut stored = obj.clone();
        let meta = stored.meta_mut();
        meta.resource_version = Some(self.next_version());
        meta.creation_timestamp = Some(Time(Utc::now()));
        meta.deletion_timestamp = None;
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, ctx: &Context, obj: &K) -> Result<K> {
        ctx.check()?;
        let key = Self::key_of(obj)?;
        let mut objects = self.objects.write();
        let current = objects.get(&key).ok_or_else(|| not_found::<K>(&key))?;

        let head = current.meta().resource_version.as_deref();
        match obj.meta().resource_version.as_deref() {
            None => {
                return Err(Error::Conflict {
                    kind: K::kind(&()).to_string(),
                    name: key.to_string(),
                    reason: "write without resourceVersion".to_string(),
                })
            }
            Some(base) if Some(base) != head => {
                return Err(stale_version(&K::kind(&()), &key, base, head));
            }
            Some(_) => {}
        }

        let mut stored = obj.clone();
        let creation = current.meta().creation_timestamp.clone();
        let deletion = current.meta().deletion_timestamp.clone();
        let meta = stored.meta_mut();
        meta.creation_timestamp = creation;
        meta.deletion_timestamp = deletion;
        meta.resource_version = Some(self.next_version());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, ctx: &Context, key: &ObjectKey, resource_version: Option<&str>) -> Result<()> {
        ctx.check()?;
        let mut objects = self.objects.write();
        let current = objects.get(key).ok_or_else(|| not_found::<K>(key))?;

        if let Some(expected) = resource_version {
            let head = current.meta().resource_version.as_deref();
            if Some(expected) != head {
                return Err(stale_version(&K::kind(&()), key, expected, head));
            }
        }

        objects.remove(key);
        Ok(())
    }

    async fn record_condition(&self, ctx: &Context, key: &ObjectKey, condition: &Condition) -> Result<bool> {
        ctx.check()?;
        let mut objects = self.objects.write();
        let current = objects.get(key).ok_or_else(|| not_found::<K>(key))?;

        let Some(conditions) = conditions_with(current, condition)? else {
            return Ok(false);
        };

        let mut raw = serde_json::to_value(current)?;
        let root = raw.as_object_mut().ok_or_else(|| {
            Error::Internal(format!("{} {} is not a JSON object", K::kind(&()), key))
        })?;
        match root.get_mut("status").and_then(|s| s.as_object_mut()) {
            Some(status) => {
                status.insert("conditions".to_string(), conditions);
            }
            None => {
                root.insert("status".to_string(), serde_json::json!({ "conditions": conditions }));
            }
        }

        let mut updated: K = serde_json::from_value(raw)?;
        updated.meta_mut().resource_version = Some(self.next_version());
        debug!(kind = %K::kind(&()), key = %key, reason = %condition.reason, "Recorded status condition");
        objects.insert(key.clone(), updated);
        Ok(true)
    }
}
