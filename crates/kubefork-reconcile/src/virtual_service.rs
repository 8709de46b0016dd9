//! VirtualService generation
//!
//! Every RouteOverride targeting a service contributes one header-matching
//! route; a final catch-all route keeps the remaining traffic on the original
//! service. Routes are ordered by override name so the generated object is
//! stable. A service with no active override gets no VirtualService.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::ResourceExt;

use kubefork_common::crd::{HttpRoute, RouteOverride, VirtualService, VirtualServiceSpec};
use kubefork_common::labels::VIRTUAL_SERVICE_LABEL;
use kubefork_common::Result;

use crate::refresh::DesiredList;

/// Build the ordered routes of `service` from the overrides in its namespace
pub fn build_routes(service_name: &str, overrides: &[RouteOverride]) -> Vec<HttpRoute> {
    let mut sorted: Vec<&RouteOverride> = overrides.iter().collect();
    sorted.sort_by_key(|o| o.name_any());

    let mut routes: Vec<HttpRoute> = sorted
        .into_iter()
        .filter(|o| o.applies_to(service_name))
        .map(|o| HttpRoute::header_exact(&o.spec.header_name, &o.spec.header_value, &o.spec.service))
        .collect();
    routes.push(HttpRoute::default_to(service_name));
    routes
}

/// Build the desired VirtualService list of `service`
///
/// The list is empty unless at least one override contributes a route.
pub fn build_virtual_services(service: &Service, overrides: &[RouteOverride]) -> Result<DesiredList> {
    let name = service.name_any();
    let routes = build_routes(&name, overrides);

    let mut items = Vec::new();
    if routes.len() > 1 {
        items.push(VirtualService::new(
            ObjectMeta {
                name: Some(name.clone()),
                namespace: service.namespace(),
                labels: Some(BTreeMap::from([(
                    VIRTUAL_SERVICE_LABEL.to_string(),
                    name.clone(),
                )])),
                ..Default::default()
            },
            VirtualServiceSpec {
                hosts: vec![name],
                http: routes,
            },
        ));
    }
    DesiredList::of(&items, virtual_service_identity)
}

/// Identity of a VirtualService: the last entry of `spec.hosts`
///
/// Only the hosts are read, so a live object with otherwise malformed routes
/// still gets a key. Objects without hosts are broken and get the empty key.
pub fn virtual_service_identity(obj: &DynamicObject) -> Result<String> {
    Ok(obj.data["spec"]["hosts"]
        .as_array()
        .and_then(|hosts| hosts.last())
        .and_then(|host| host.as_str())
        .unwrap_or_default()
        .to_string())
}
