//! Resource store backed by the Kubernetes API server

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use tracing::{debug, trace};

use super::ResourceStore;
use crate::{Error, LabelQuery, Result, CONTROLLER_NAME};

/// Real Kubernetes client implementation
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new KubeStore wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    fn list_params(query: &LabelQuery) -> ListParams {
        if query.selects_all() {
            ListParams::default()
        } else {
            ListParams::default().labels(&query.to_string())
        }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        }
    }
}

fn namespace_of(resource: &ApiResource, obj: &DynamicObject) -> Result<String> {
    obj.namespace().ok_or_else(|| {
        Error::validation(format!(
            "{} {} has no namespace",
            resource.kind,
            obj.name_any()
        ))
    })
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        self.api(resource, namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::store("get", &resource.kind, format!("{namespace}/{name}"), e))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        query: &LabelQuery,
    ) -> Result<Vec<DynamicObject>> {
        let list = self
            .api(resource, namespace)
            .list(&Self::list_params(query))
            .await
            .map_err(|e| Error::store("list", &resource.kind, namespace, e))?;
        trace!(kind = %resource.kind, namespace, count = list.items.len(), "listed");
        Ok(list.items)
    }

    async fn list_all(
        &self,
        resource: &ApiResource,
        query: &LabelQuery,
    ) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), resource);
        let list = api
            .list(&Self::list_params(query))
            .await
            .map_err(|e| Error::store("list", &resource.kind, "*", e))?;
        Ok(list.items)
    }

    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = namespace_of(resource, obj)?;
        let name = obj.name_any();
        let created = self
            .api(resource, &namespace)
            .create(&Self::post_params(), obj)
            .await
            .map_err(|e| Error::store("create", &resource.kind, format!("{namespace}/{name}"), e))?;
        debug!(kind = %resource.kind, namespace = %namespace, name = %name, "created");
        Ok(created)
    }

    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let namespace = namespace_of(resource, obj)?;
        let name = obj.name_any();
        let replaced = self
            .api(resource, &namespace)
            .replace(&name, &Self::post_params(), obj)
            .await
            .map_err(|e| {
                Error::store("replace", &resource.kind, format!("{namespace}/{name}"), e)
            })?;
        debug!(kind = %resource.kind, namespace = %namespace, name = %name, "replaced");
        Ok(replaced)
    }

    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        match self
            .api(resource, namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => {
                debug!(kind = %resource.kind, namespace, name, "deleted");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()), // Already gone
            Err(e) => Err(Error::store(
                "delete",
                &resource.kind,
                format!("{namespace}/{name}"),
                e,
            )),
        }
    }
}
