//! In-memory resource store for tests
//!
//! Mimics the API server behaviour the reconcilers depend on: uid and
//! resourceVersion assignment, conflicts on duplicate create and stale
//! replace, not-found when replacing or deleting a missing object. Every write
//! is counted so tests can assert that a converged pass is write-free.

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{DynamicObject, TypeMeta};
use kube::core::ErrorResponse;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use parking_lot::Mutex;

use super::ResourceStore;
use crate::{Error, LabelQuery, Result};

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    next_uid: u64,
    next_version: u64,
    writes: usize,
}

impl State {
    fn stamp(&mut self, resource: &ApiResource, obj: &mut DynamicObject) {
        self.next_version += 1;
        obj.metadata.resource_version = Some(self.next_version.to_string());
        obj.types = Some(TypeMeta {
            api_version: resource.api_version.clone(),
            kind: resource.kind.clone(),
        });
    }

    fn insert_new(&mut self, resource: &ApiResource, mut obj: DynamicObject) -> DynamicObject {
        self.next_uid += 1;
        obj.metadata.uid = Some(format!("uid-{}", self.next_uid));
        self.stamp(resource, &mut obj);
        let key = key(resource, &obj.namespace().unwrap_or_default(), &obj.name_any());
        self.objects.insert(key, obj.clone());
        obj
    }
}

fn key(resource: &ApiResource, namespace: &str, name: &str) -> Key {
    (
        format!("{}/{}", resource.api_version, resource.kind),
        namespace.to_string(),
        name.to_string(),
    )
}

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message,
        reason: reason.to_string(),
        code,
    })
}

/// In-memory [`ResourceStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, without counting it as a write
    ///
    /// The object is given a uid and resourceVersion like a created one.
    pub fn seed(&self, resource: &ApiResource, obj: DynamicObject) -> DynamicObject {
        self.state.lock().insert_new(resource, obj)
    }

    /// Every stored object of a kind in a namespace, ordered by name
    pub fn objects(&self, resource: &ApiResource, namespace: &str) -> Vec<DynamicObject> {
        let kind = format!("{}/{}", resource.api_version, resource.kind);
        self.state
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Number of create, replace and delete calls that changed the store
    pub fn writes(&self) -> usize {
        self.state.lock().writes
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self
            .state
            .lock()
            .objects
            .get(&key(resource, namespace, name))
            .cloned())
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        query: &LabelQuery,
    ) -> Result<Vec<DynamicObject>> {
        Ok(self
            .objects(resource, namespace)
            .into_iter()
            .filter(|obj| query.matches(obj.labels()))
            .collect())
    }

    async fn list_all(
        &self,
        resource: &ApiResource,
        query: &LabelQuery,
    ) -> Result<Vec<DynamicObject>> {
        let kind = format!("{}/{}", resource.api_version, resource.kind);
        Ok(self
            .state
            .lock()
            .objects
            .iter()
            .filter(|((k, _, _), obj)| *k == kind && query.matches(obj.labels()))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let id = format!("{namespace}/{name}");
        let mut state = self.state.lock();

        if obj.metadata.resource_version.is_some() {
            let err = api_error(
                400,
                "BadRequest",
                "resourceVersion should not be set on objects to be created".to_string(),
            );
            return Err(Error::store("create", &resource.kind, id, err));
        }
        if state.objects.contains_key(&key(resource, &namespace, &name)) {
            let err = api_error(409, "AlreadyExists", format!("{} {id} already exists", resource.kind));
            return Err(Error::store("create", &resource.kind, id, err));
        }

        state.writes += 1;
        Ok(state.insert_new(resource, obj.clone()))
    }

    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let id = format!("{namespace}/{name}");
        let mut state = self.state.lock();
        let k = key(resource, &namespace, &name);

        let Some(current) = state.objects.get(&k) else {
            let err = api_error(404, "NotFound", format!("{} {id} not found", resource.kind));
            return Err(Error::store("replace", &resource.kind, id, err));
        };
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != current.metadata.resource_version
        {
            let err = api_error(409, "Conflict", format!("{} {id} has been modified", resource.kind));
            return Err(Error::store("replace", &resource.kind, id, err));
        }

        let mut stored = obj.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        state.stamp(resource, &mut stored);
        state.writes += 1;
        state.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state
            .objects
            .remove(&key(resource, namespace, name))
            .is_none()
        {
            let err = api_error(404, "NotFound", format!("{} {namespace}/{name} not found", resource.kind));
            return Err(Error::store(
                "delete",
                &resource.kind,
                format!("{namespace}/{name}"),
                err,
            ));
        }
        state.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kube_utils::build_api_resource;

    fn mapping_resource() -> ApiResource {
        build_api_resource("getambassador.io/v2", "Mapping")
    }

    fn mapping(ns: &str, name: &str, labels: &[(&str, &str)]) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &mapping_resource()).within(ns);
        obj.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        obj
    }

    #[tokio::test]
    async fn create_assigns_uid_and_version() {
        let store = MemoryStore::new();
        let ar = mapping_resource();

        let created = store.create(&ar, &mapping("gw", "a", &[])).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.resource_version.is_some());
        assert_eq!(store.writes(), 1);

        let err = store.create(&ar, &mapping("gw", "a", &[])).await.unwrap_err();
        assert!(err.kube_source().is_some());
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn stale_replace_conflicts() {
        let store = MemoryStore::new();
        let ar = mapping_resource();
        let created = store.create(&ar, &mapping("gw", "a", &[])).await.unwrap();

        let mut first = created.clone();
        first.metadata.labels = Some(BTreeMap::from([("v".to_string(), "1".to_string())]));
        store.replace(&ar, &first).await.unwrap();

        let err = store.replace(&ar, &created).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn list_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        let ar = mapping_resource();
        store.seed(&ar, mapping("gw", "a", &[("team", "x")]));
        store.seed(&ar, mapping("gw", "b", &[("team", "y")]));
        store.seed(&ar, mapping("other", "c", &[("team", "x")]));

        let query = LabelQuery::everything().with_equals("team", "x");
        let listed = store.list(&ar, "gw", &query).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name_any(), "a");

        assert_eq!(store.list_all(&ar, &query).await.unwrap().len(), 2);
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .delete(&mapping_resource(), "gw", "missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
