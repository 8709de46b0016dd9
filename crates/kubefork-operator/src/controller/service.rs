//! Service controller
//!
//! Also woken by every RouteOverride change, including deletion, for the
//! service the override names.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use tracing::instrument;

use kubefork_common::crd::RouteOverride;
use kubefork_common::{Error, NamespacedName};

use super::Context;

/// Reconcile a Service: refresh its VirtualService
#[instrument(skip(service, ctx), fields(service = %service.name_any()))]
pub async fn reconcile(service: Arc<Service>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = NamespacedName::of(service.as_ref());
    ctx.reconciler.reconcile_service(&key).await?;
    Ok(Action::await_change())
}

/// The service an override routes for, in the override's namespace
pub fn host_of(route_override: RouteOverride) -> Option<ObjectRef<Service>> {
    let namespace = route_override.namespace()?;
    Some(ObjectRef::new(&route_override.spec.host).within(&namespace))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::discovery::ApiResource;
    use kubefork_common::crd::{RouteOverrideSpec, VirtualService};
    use kubefork_common::store::MemoryStore;
    use kubefork_common::{as_typed, to_dynamic, HasApiResource};

    use crate::controller::test_support;

    fn route_override() -> RouteOverride {
        let mut o = RouteOverride::new(
            "api-dev",
            RouteOverrideSpec {
                host: "api".to_string(),
                service: "api-dev".to_string(),
                header_name: "x-fork-identifier".to_string(),
                header_value: "alice".to_string(),
            },
        );
        o.metadata.namespace = Some("team-a".to_string());
        o
    }

    #[test]
    fn override_maps_to_host_service() {
        let target = host_of(route_override()).unwrap();
        assert_eq!(target.name, "api");
        assert_eq!(target.namespace.as_deref(), Some("team-a"));
    }

    #[tokio::test]
    async fn service_with_override_gets_virtual_service() {
        let store = Arc::new(MemoryStore::new());
        let service = Service {
            metadata: ObjectMeta {
                name: Some("api".to_string()),
                namespace: Some("team-a".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec::default()),
            status: None,
        };
        let seeded = store.seed(
            &ApiResource::erase::<Service>(&()),
            to_dynamic(&service).unwrap(),
        );
        store.seed(
            &ApiResource::erase::<RouteOverride>(&()),
            to_dynamic(&route_override()).unwrap(),
        );

        reconcile(
            Arc::new(as_typed(&seeded).unwrap()),
            test_support::context(store.clone()),
        )
        .await
        .unwrap();

        assert_eq!(
            store
                .objects(&VirtualService::api_resource(), "team-a")
                .len(),
            1
        );
    }
}
