//! Kubernetes object store
//!
//! Objects live as namespaced custom resources. The engine keeps the
//! [`CLEANUP_FINALIZER`] on every object it writes so that a `kubectl delete`
//! only sets the deletion timestamp; the finalizer is released when the
//! engine hard deletes the resource after the CSP plugin cleaned up.

use super::{conditions_with, stale_version, ListOptions, ObjectKey, ObjectList, ObjectStore, Selector};
use crate::context::Context;
use crate::crd::labels::CLEANUP_FINALIZER;
use crate::crd::Condition;
use crate::error::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::params::Preconditions;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::{debug, info};

/// Object store backed by the Kubernetes API server
pub struct KubeObjectStore<K> {
    client: Client,
    /// Restrict list calls to one namespace, `None` watches the cluster
    namespace: Option<String>,
    _kind: std::marker::PhantomData<fn() -> K>,
}

impl<K> KubeObjectStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    pub fn new(client: Client) -> Self {
        Self {
            client,
            namespace: None,
            _kind: std::marker::PhantomData,
        }
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    fn api(&self, namespace: Option<&str>) -> Api<K> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    fn api_for(&self, key: &ObjectKey) -> Result<Api<K>> {
        match key.namespace.as_deref() {
            Some(ns) => Ok(self.api(Some(ns))),
            None => Err(Error::Validation(format!(
                "{} {} has no namespace",
                K::kind(&()),
                key.name
            ))),
        }
    }

    fn map_error(key: &ObjectKey) -> impl Fn(kube::Error) -> Error + '_ {
        move |err| map_kube_error(&K::kind(&()), key, err)
    }
}

/// Translate API server responses into the store error taxonomy
pub fn map_kube_error(kind: &str, key: &ObjectKey, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => Error::NotFound {
                kind: kind.to_string(),
                name: key.to_string(),
            },
            409 if resp.reason == "AlreadyExists" => Error::AlreadyExists {
                kind: kind.to_string(),
                name: key.to_string(),
            },
            409 => Error::Conflict {
                kind: kind.to_string(),
                name: key.to_string(),
                reason: resp.message,
            },
            400 | 422 => Error::Validation(resp.message),
            401 | 403 => Error::Forbidden(resp.message),
            code => Error::Unavailable(format!("{} ({}): {}", resp.reason, code, resp.message)),
        },
        other => Error::Unavailable(other.to_string()),
    }
}

fn ensure_finalizer(meta: &mut ObjectMeta) {
    let finalizers = meta.finalizers.get_or_insert_with(Vec::new);
    if !finalizers.iter().any(|f| f == CLEANUP_FINALIZER) {
        finalizers.push(CLEANUP_FINALIZER.to_string());
    }
}

/// Carry over the server-managed fields the domain model does not track
fn merge_unmanaged(current: &ObjectMeta, desired: &mut ObjectMeta) {
    desired.uid = current.uid.clone();
    desired.owner_references = current.owner_references.clone();
    desired.finalizers = current.finalizers.clone();
    desired.generation = current.generation;
    ensure_finalizer(desired);
}

/// Delete options, guarded by `resource_version` when one is given
fn delete_params(resource_version: Option<String>) -> DeleteParams {
    DeleteParams {
        preconditions: resource_version.map(|version| Preconditions {
            resource_version: Some(version),
            uid: None,
        }),
        ..DeleteParams::default()
    }
}

fn status_of<K: Serialize>(obj: &K) -> Result<Option<serde_json::Value>> {
    Ok(serde_json::to_value(obj)?
        .get("status")
        .filter(|s| !s.is_null())
        .cloned())
}

impl<K> KubeObjectStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    /// Write the status subresource, guarded by the object's version
    async fn write_status(
        &self,
        ctx: &Context,
        api: &Api<K>,
        key: &ObjectKey,
        written: K,
        status: Option<serde_json::Value>,
    ) -> Result<K> {
        let Some(status) = status else {
            return Ok(written);
        };
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": written.resource_version() },
            "status": status,
        });
        ctx.run(api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await?
            .map_err(Self::map_error(key))
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeObjectStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, ctx: &Context, key: &ObjectKey) -> Result<K> {
        let api = self.api_for(key)?;
        ctx.run(api.get(&key.name))
            .await?
            .map_err(Self::map_error(key))
    }

    async fn list(&self, ctx: &Context, opts: &ListOptions) -> Result<ObjectList<K>> {
        let selector = Selector::parse_opt(opts.label_selector.as_deref())?;
        let namespace = opts.namespace.as_deref().or(self.namespace.as_deref());
        let api = self.api(namespace);

        let mut params = ListParams::default();
        if let Some(server_side) = selector.server_side() {
            params = params.labels(&server_side);
        }
        if let Some(limit) = opts.limit {
            params = params.limit(u32::try_from(limit).unwrap_or(u32::MAX));
        }
        if let Some(token) = &opts.continue_token {
            params = params.continue_token(token);
        }

        let scope = ObjectKey {
            namespace: namespace.map(str::to_string),
            name: String::new(),
        };
        let list = ctx
            .run(api.list(&params))
            .await?
            .map_err(Self::map_error(&scope))?;

        // Pages may come back shorter than the limit once the client-side
        // part of the selector is applied.
        let items = list
            .items
            .into_iter()
            .filter(|obj| selector.matches(obj.labels()))
            .collect();

        Ok(ObjectList {
            items,
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
        })
    }

    async fn create(&self, ctx: &Context, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let api = self.api_for(&key)?;
        let status = status_of(obj)?;

        let mut desired = obj.clone();
        desired.meta_mut().resource_version = None;
        ensure_finalizer(desired.meta_mut());

        info!(kind = %K::kind(&()), key = %key, "Creating object");
        let created = ctx
            .run(api.create(&PostParams::default(), &desired))
            .await?
            .map_err(Self::map_error(&key))?;
        self.write_status(ctx, &api, &key, created, status).await
    }

    async fn replace(&self, ctx: &Context, obj: &K) -> Result<K> {
        let key = ObjectKey::of(obj);
        let api = self.api_for(&key)?;
        let status = status_of(obj)?;

        if obj.resource_version().is_none() {
            return Err(Error::Conflict {
                kind: K::kind(&()).to_string(),
                name: key.to_string(),
                reason: "write without resourceVersion".to_string(),
            });
        }

        let current = ctx
            .run(api.get(&key.name))
            .await?
            .map_err(Self::map_error(&key))?;

        let mut desired = obj.clone();
        merge_unmanaged(current.meta(), desired.meta_mut());

        debug!(kind = %K::kind(&()), key = %key, version = ?desired.resource_version(), "Replacing object");
        let replaced = ctx
            .run(api.replace(&key.name, &PostParams::default(), &desired))
            .await?
            .map_err(Self::map_error(&key))?;
        self.write_status(ctx, &api, &key, replaced, status).await
    }

    async fn delete(&self, ctx: &Context, key: &ObjectKey, resource_version: Option<&str>) -> Result<()> {
        let api = self.api_for(key)?;
        let mut current = ctx
            .run(api.get(&key.name))
            .await?
            .map_err(Self::map_error(key))?;

        if let Some(expected) = resource_version {
            let head = current.resource_version();
            if head.as_deref() != Some(expected) {
                return Err(stale_version(&K::kind(&()), key, expected, head.as_deref()));
            }
        }

        let terminating = current.meta().deletion_timestamp.is_some();
        let finalizers = current.finalizers_mut();
        let before = finalizers.len();
        finalizers.retain(|f| f != CLEANUP_FINALIZER);

        // the finalizer release bumps the version the delete is guarded by
        let mut guard = resource_version.map(str::to_string);
        if finalizers.len() != before {
            debug!(kind = %K::kind(&()), key = %key, "Releasing cleanup finalizer");
            match ctx
                .run(api.replace(&key.name, &PostParams::default(), &current))
                .await?
            {
                Ok(released) => {
                    if guard.is_some() {
                        guard = released.resource_version();
                    }
                }
                // releasing the last finalizer of a terminating object removes it
                Err(kube::Error::Api(resp)) if resp.code == 404 => return Ok(()),
                Err(err) => return Err(map_kube_error(&K::kind(&()), key, err)),
            }
        }

        if terminating {
            return Ok(());
        }

        info!(kind = %K::kind(&()), key = %key, "Deleting object");
        match ctx.run(api.delete(&key.name, &delete_params(guard))).await? {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(map_kube_error(&K::kind(&()), key, err)),
        }
    }

    async fn record_condition(&self, ctx: &Context, key: &ObjectKey, condition: &Condition) -> Result<bool> {
        let api = self.api_for(key)?;
        let current = ctx
            .run(api.get(&key.name))
            .await?
            .map_err(Self::map_error(key))?;

        let Some(conditions) = conditions_with(&current, condition)? else {
            return Ok(false);
        };

        // merge patches replace arrays, so the full history is sent
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": current.resource_version() },
            "status": { "conditions": conditions },
        });
        debug!(kind = %K::kind(&()), key = %key, reason = %condition.reason, "Recording status condition");
        ctx.run(api.patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await?
            .map_err(Self::map_error(key))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} happened", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_error_mapping() {
        let key = ObjectKey::namespaced("acme--prod", "vol-1");
        let map = |code, reason| map_kube_error("BlockStorage", &key, api_error(code, reason));

        assert_matches!(map(404, "NotFound"), Error::NotFound { .. });
        assert_matches!(map(409, "AlreadyExists"), Error::AlreadyExists { .. });
        assert_matches!(map(409, "Conflict"), Error::Conflict { .. });
        assert_matches!(map(422, "Invalid"), Error::Validation(_));
        assert_matches!(map(403, "Forbidden"), Error::Forbidden(_));
        assert_matches!(map(503, "ServiceUnavailable"), Error::Unavailable(_));
    }

    #[test]
    fn test_delete_is_guarded_by_version() {
        let guarded = delete_params(Some("42".to_string()));
        let preconditions = guarded.preconditions.unwrap();
        assert_eq!(preconditions.resource_version.as_deref(), Some("42"));
        assert_eq!(preconditions.uid, None);

        assert!(delete_params(None).preconditions.is_none());
    }

    #[test]
    fn test_finalizer_handling() {
        let mut meta = ObjectMeta::default();
        ensure_finalizer(&mut meta);
        ensure_finalizer(&mut meta);
        assert_eq!(meta.finalizers, Some(vec![CLEANUP_FINALIZER.to_string()]));

        let current = ObjectMeta {
            uid: Some("1234".to_string()),
            finalizers: Some(vec!["other.io/guard".to_string()]),
            ..Default::default()
        };
        let mut desired = ObjectMeta::default();
        merge_unmanaged(&current, &mut desired);
        assert_eq!(desired.uid.as_deref(), Some("1234"));
        assert_eq!(
            desired.finalizers,
            Some(vec![
                "other.io/guard".to_string(),
                CLEANUP_FINALIZER.to_string()
            ])
        );
    }
}
