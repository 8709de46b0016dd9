//! Child-resource reconciliation
//!
//! The [`Refresher`] converges the children of one parent, for one kind, to a
//! freshly built desired list:
//!
//! 1. Live objects of the kind in the parent's namespace are listed; objects
//!    not owned by the parent are ignored.
//! 2. Owned objects whose identity key is no longer desired are deleted.
//! 3. Every desired item is upserted under a stable name: the name of the live
//!    object with the same identity, else the item's own name (cut to 63
//!    characters), else a name derived from the identity and the parent.
//!
//! A pass with nothing to change issues no writes. Failures abort the list and
//! carry the kind and identity key; a retry redoes the whole pass.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, trace};

use kubefork_common::kube_utils::{owned_by, set_controller_reference};
use kubefork_common::naming::{resource_name, truncate_name};
use kubefork_common::{
    to_dynamic, Error, HasApiResource, LabelQuery, ParentRef, ResourceStore, Result,
};

/// Computes the identity key of a desired item or live object
pub type IdentityFn = fn(&DynamicObject) -> Result<String>;

/// Desired children of one kind
#[derive(Debug)]
pub struct DesiredList {
    /// Kind of every item
    pub resource: ApiResource,
    /// Items in builder order
    pub items: Vec<DynamicObject>,
    /// Identity of an item; must give the same key for the live object
    pub identity: IdentityFn,
}

impl DesiredList {
    /// Create a list from dynamic items
    pub fn new(resource: ApiResource, items: Vec<DynamicObject>, identity: IdentityFn) -> Self {
        Self {
            resource,
            items,
            identity,
        }
    }

    /// Create a list from typed items with a compile-time known kind
    pub fn of<T: HasApiResource + Serialize>(items: &[T], identity: IdentityFn) -> Result<Self> {
        let items = items.iter().map(to_dynamic).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(T::api_resource(), items, identity))
    }

    /// Create a list from typed Kubernetes resources
    pub fn of_resources<K>(items: &[K], identity: IdentityFn) -> Result<Self>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let items = items.iter().map(to_dynamic).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(ApiResource::erase::<K>(&()), items, identity))
    }

    /// Kind of the listed items
    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    fn identify(&self, obj: &DynamicObject) -> Result<String> {
        (self.identity)(obj).map_err(|e| e.in_refresh(self.kind(), obj.name_any()))
    }
}

/// Converges owned children to a desired list
#[derive(Clone)]
pub struct Refresher {
    store: Arc<dyn ResourceStore>,
}

impl Refresher {
    /// Create a refresher writing through `store`
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Converge the children of `parent` of the list's kind to `list`
    #[instrument(skip_all, fields(parent = %parent, kind = %list.kind()))]
    pub async fn refresh(&self, parent: &ParentRef, list: &DesiredList) -> Result<()> {
        let desired = dedup_by_identity(list)?;
        let desired_ids: BTreeSet<&str> = desired.iter().map(|(id, _)| id.as_str()).collect();

        let existing = self.collect_existing(parent, list, &desired_ids).await?;

        for (id, item) in &desired {
            let name = match existing.get(id) {
                Some(live) => live.name_any(),
                None => match item.metadata.name.as_deref().filter(|n| !n.is_empty()) {
                    Some(explicit) => truncate_name(explicit).to_string(),
                    None => resource_name(id, &parent.name),
                },
            };
            self.upsert(parent, &list.resource, item, &name)
                .await
                .map_err(|e| e.in_refresh(list.kind(), id))?;
        }

        Ok(())
    }

    /// List owned children, delete the undesired ones and index the rest by identity
    async fn collect_existing(
        &self,
        parent: &ParentRef,
        list: &DesiredList,
        desired_ids: &BTreeSet<&str>,
    ) -> Result<HashMap<String, DynamicObject>> {
        let live = self
            .store
            .list(&list.resource, &parent.namespace, &LabelQuery::everything())
            .await
            .map_err(|e| e.in_refresh(list.kind(), "*"))?;

        let mut existing = HashMap::new();
        for obj in live.into_iter().filter(|obj| owned_by(obj, parent)) {
            let id = list.identify(&obj)?;
            if desired_ids.contains(id.as_str()) {
                existing.insert(id, obj);
                continue;
            }

            let name = obj.name_any();
            info!(name = %name, identity = %id, "deleting child no longer desired");
            match self
                .store
                .delete(&list.resource, &parent.namespace, &name)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_not_found() => trace!(name = %name, "child already gone"),
                Err(e) => return Err(e.in_refresh(list.kind(), id)),
            }
        }
        Ok(existing)
    }

    async fn upsert(
        &self,
        parent: &ParentRef,
        resource: &ApiResource,
        desired: &DynamicObject,
        name: &str,
    ) -> Result<()> {
        let current = self.store.get(resource, &parent.namespace, name).await?;

        let mut merged = match &current {
            Some(live) => live.clone(),
            None => DynamicObject::new(name, resource).within(&parent.namespace),
        };
        apply_desired(&mut merged, desired);
        set_controller_reference(&mut merged, parent)?;

        match current {
            None => {
                self.store.create(resource, &merged).await?;
                info!(name = %name, "created child");
            }
            Some(live) if live.metadata == merged.metadata && live.data == merged.data => {
                trace!(name = %name, "child up to date");
            }
            Some(_) => {
                self.store.replace(resource, &merged).await?;
                debug!(name = %name, "updated child");
            }
        }
        Ok(())
    }
}

/// Pair each item with its identity, keeping only the last item per identity
///
/// The surviving items stay in builder order.
fn dedup_by_identity(list: &DesiredList) -> Result<Vec<(String, &DynamicObject)>> {
    let keyed = list
        .items
        .iter()
        .map(|item| Ok((list.identify(item)?, item)))
        .collect::<Result<Vec<_>>>()?;

    let last: HashMap<&str, usize> = keyed
        .iter()
        .enumerate()
        .map(|(idx, (id, _))| (id.as_str(), idx))
        .collect();
    let keep: BTreeSet<usize> = last.into_values().collect();

    Ok(keyed
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| keep.contains(idx))
        .map(|(_, pair)| pair)
        .collect())
}

/// Copy labels, annotations and body of `desired` onto `target`
///
/// Name, namespace, resourceVersion, uid, owner references and status of the
/// target are kept.
fn apply_desired(target: &mut DynamicObject, desired: &DynamicObject) {
    target.metadata.labels = non_empty(desired.metadata.labels.clone());
    target.metadata.annotations = non_empty(desired.metadata.annotations.clone());

    let status = target.data.get("status").cloned();
    let mut data = match &desired.data {
        Value::Object(fields) => fields
            .iter()
            .filter(|(key, _)| key.as_str() != "status")
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => serde_json::Map::new(),
    };
    if let Some(status) = status {
        data.insert("status".to_string(), status);
    }
    target.data = Value::Object(data);
}

fn non_empty(map: Option<BTreeMap<String, String>>) -> Option<BTreeMap<String, String>> {
    map.filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;
    use kubefork_common::kube_utils::build_api_resource;
    use kubefork_common::store::{MemoryStore, MockResourceStore};
    use serde_json::json;

    const ID_LABEL: &str = "test/id";

    fn widgets() -> ApiResource {
        build_api_resource("example.dev/v1", "Widget")
    }

    fn parent() -> ParentRef {
        ParentRef {
            api_version: "fork.kubefork.dev/v1beta1".to_string(),
            kind: "ForkManager".to_string(),
            name: "main".to_string(),
            namespace: "gateway".to_string(),
            uid: "parent-uid".to_string(),
        }
    }

    fn other_parent() -> ParentRef {
        ParentRef {
            name: "other".to_string(),
            uid: "other-uid".to_string(),
            ..parent()
        }
    }

    fn label_identity(obj: &DynamicObject) -> Result<String> {
        obj.labels()
            .get(ID_LABEL)
            .cloned()
            .ok_or_else(|| Error::identity("Widget", "missing id label"))
    }

    fn widget(id: &str, name: Option<&str>, size: u32) -> DynamicObject {
        let mut obj = DynamicObject::new(name.unwrap_or_default(), &widgets());
        if name.is_none() {
            obj.metadata.name = None;
        }
        obj.metadata.labels = Some(BTreeMap::from([(ID_LABEL.to_string(), id.to_string())]));
        obj.data = json!({ "spec": { "size": size } });
        obj
    }

    fn desired(items: Vec<DynamicObject>) -> DesiredList {
        DesiredList::new(widgets(), items, label_identity)
    }

    fn ids(store: &MemoryStore) -> Vec<String> {
        let mut ids: Vec<String> = store
            .objects(&widgets(), "gateway")
            .iter()
            .filter_map(|o| o.labels().get(ID_LABEL).cloned())
            .collect();
        ids.sort();
        ids
    }

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "injected".to_string(),
            reason: "Test".to_string(),
            code,
        })
    }

    // =========================================================================
    // Convergence
    // =========================================================================

    /// Story: the first pass creates every child, an identical second pass
    /// writes nothing
    #[tokio::test]
    async fn story_second_identical_pass_is_write_free() {
        let store = Arc::new(MemoryStore::new());
        let refresher = Refresher::new(store.clone());
        let list = desired(vec![widget("a", None, 1), widget("b", Some("bee"), 2)]);

        refresher.refresh(&parent(), &list).await.unwrap();
        assert_eq!(store.writes(), 2);
        assert_eq!(ids(&store), vec!["a", "b"]);

        refresher.refresh(&parent(), &list).await.unwrap();
        assert_eq!(store.writes(), 2, "converged pass must not write");
    }

    #[tokio::test]
    async fn children_are_controlled_by_parent() {
        let store = Arc::new(MemoryStore::new());
        Refresher::new(store.clone())
            .refresh(&parent(), &desired(vec![widget("a", None, 1)]))
            .await
            .unwrap();

        let objs = store.objects(&widgets(), "gateway");
        let refs = objs[0].owner_references();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].name, "main");
        assert_eq!(refs[0].uid, "parent-uid");
        assert_eq!(refs[0].controller, Some(true));
    }

    /// Story: shrinking the desired set deletes exactly the dropped children
    /// and leaves objects of other owners alone
    #[tokio::test]
    async fn story_garbage_collection_is_scoped_to_owner() {
        let store = Arc::new(MemoryStore::new());
        let refresher = Refresher::new(store.clone());

        refresher
            .refresh(&other_parent(), &desired(vec![widget("z", None, 9)]))
            .await
            .unwrap();
        let mut unowned = widget("c", Some("hand-made"), 0);
        unowned.metadata.namespace = Some("gateway".to_string());
        store.seed(&widgets(), unowned);

        refresher
            .refresh(
                &parent(),
                &desired(vec![widget("a", None, 1), widget("b", None, 2), widget("c", None, 3)]),
            )
            .await
            .unwrap();
        refresher
            .refresh(&parent(), &desired(vec![widget("a", None, 1)]))
            .await
            .unwrap();

        let remaining: Vec<(String, String)> = store
            .objects(&widgets(), "gateway")
            .iter()
            .map(|o| (o.name_any(), label_identity(o).unwrap()))
            .collect();
        assert!(remaining.contains(&("a-main".to_string(), "a".to_string())));
        assert!(remaining.contains(&("hand-made".to_string(), "c".to_string())));
        assert!(remaining.contains(&("z-other".to_string(), "z".to_string())));
        assert_eq!(remaining.len(), 3);
    }

    #[tokio::test]
    async fn empty_desired_list_removes_all_owned_children() {
        let store = Arc::new(MemoryStore::new());
        let refresher = Refresher::new(store.clone());
        refresher
            .refresh(&parent(), &desired(vec![widget("a", None, 1)]))
            .await
            .unwrap();

        refresher.refresh(&parent(), &desired(vec![])).await.unwrap();
        assert!(ids(&store).is_empty());
    }

    /// Story: changing an item's content or explicit name never renames the
    /// live child carrying the same identity
    #[tokio::test]
    async fn story_names_are_stable_across_content_changes() {
        let store = Arc::new(MemoryStore::new());
        let refresher = Refresher::new(store.clone());

        refresher
            .refresh(&parent(), &desired(vec![widget("a", Some("first"), 1)]))
            .await
            .unwrap();
        refresher
            .refresh(&parent(), &desired(vec![widget("a", Some("second"), 7)]))
            .await
            .unwrap();

        let objs = store.objects(&widgets(), "gateway");
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].name_any(), "first");
        assert_eq!(objs[0].data["spec"]["size"], 7);
    }

    #[tokio::test]
    async fn explicit_names_are_cut_and_derived_names_bounded() {
        let store = Arc::new(MemoryStore::new());
        let long_name = "n".repeat(80);
        let long_id = "i".repeat(70);

        Refresher::new(store.clone())
            .refresh(
                &parent(),
                &desired(vec![widget("a", Some(&long_name), 1), widget(&long_id, None, 2)]),
            )
            .await
            .unwrap();

        let names: Vec<String> = store
            .objects(&widgets(), "gateway")
            .iter()
            .map(|o| o.name_any())
            .collect();
        assert!(names.contains(&"n".repeat(63)));
        assert!(names.iter().all(|n| n.len() <= 63));
        assert_eq!(names.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_identities_keep_last_item() {
        let store = Arc::new(MemoryStore::new());
        Refresher::new(store.clone())
            .refresh(
                &parent(),
                &desired(vec![widget("a", Some("one"), 1), widget("a", Some("two"), 2)]),
            )
            .await
            .unwrap();

        let objs = store.objects(&widgets(), "gateway");
        assert_eq!(objs.len(), 1);
        assert_eq!(objs[0].name_any(), "two");
        assert_eq!(objs[0].data["spec"]["size"], 2);
    }

    #[tokio::test]
    async fn status_of_live_child_is_preserved() {
        let store = Arc::new(MemoryStore::new());
        let refresher = Refresher::new(store.clone());
        refresher
            .refresh(&parent(), &desired(vec![widget("a", None, 1)]))
            .await
            .unwrap();

        let mut live = store.objects(&widgets(), "gateway").remove(0);
        live.data["status"] = json!({ "ready": true });
        store.replace(&widgets(), &live).await.unwrap();
        let writes = store.writes();

        refresher
            .refresh(&parent(), &desired(vec![widget("a", None, 1)]))
            .await
            .unwrap();
        assert_eq!(store.writes(), writes);
        assert_eq!(
            store.objects(&widgets(), "gateway")[0].data["status"]["ready"],
            true
        );
    }

    #[tokio::test]
    async fn name_taken_by_another_controller_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let refresher = Refresher::new(store.clone());
        refresher
            .refresh(&other_parent(), &desired(vec![widget("x", Some("shared"), 1)]))
            .await
            .unwrap();

        let err = refresher
            .refresh(&parent(), &desired(vec![widget("y", Some("shared"), 1)]))
            .await
            .unwrap_err();
        match err {
            Error::Refresh {
                kind,
                identity,
                source,
            } => {
                assert_eq!(kind, "Widget");
                assert_eq!(identity, "y");
                assert!(matches!(*source, Error::OwnerReference { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    // =========================================================================
    // Failure paths
    // =========================================================================

    #[tokio::test]
    async fn identity_failure_aborts_before_any_write() {
        let mut store = MockResourceStore::new();
        store.expect_list().never();
        store.expect_create().never();

        let mut broken = widget("a", Some("broken"), 1);
        broken.metadata.labels = None;

        let err = Refresher::new(Arc::new(store))
            .refresh(&parent(), &desired(vec![widget("ok", None, 1), broken]))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn list_failure_carries_kind_and_is_retryable() {
        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .returning(|_, _, _| Err(Error::store("list", "Widget", "gateway", api_error(500))));

        let err = Refresher::new(Arc::new(store))
            .refresh(&parent(), &desired(vec![widget("a", None, 1)]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Widget"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn orphan_already_deleted_counts_as_converged() {
        let mut orphan = widget("gone", Some("gone"), 1);
        orphan.metadata.namespace = Some("gateway".to_string());
        set_controller_reference(&mut orphan, &parent()).unwrap();

        let mut store = MockResourceStore::new();
        store
            .expect_list()
            .returning(move |_, _, _| Ok(vec![orphan.clone()]));
        store.expect_delete().times(1).returning(|_, ns, name| {
            Err(Error::store("delete", "Widget", format!("{ns}/{name}"), api_error(404)))
        });

        Refresher::new(Arc::new(store))
            .refresh(&parent(), &desired(vec![]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_failure_stops_the_list() {
        let mut store = MockResourceStore::new();
        store.expect_list().returning(|_, _, _| Ok(vec![]));
        store.expect_get().returning(|_, _, _| Ok(None));
        store
            .expect_create()
            .times(1)
            .returning(|_, _| Err(Error::store("create", "Widget", "gateway/a", api_error(409))));

        let err = Refresher::new(Arc::new(store))
            .refresh(
                &parent(),
                &desired(vec![widget("a", None, 1), widget("b", None, 2)]),
            )
            .await
            .unwrap_err();
        match err {
            Error::Refresh { identity, .. } => assert_eq!(identity, "a"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
