//! Copied Service and RouteOverride generation

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::ResourceExt;

use kubefork_common::crd::{Fork, RouteOverride, RouteOverrideSpec};
use kubefork_common::labels::{
    routed_from_label, FORK_IDENTIFIER_LABEL, LABEL_TRUE, ORIGINAL_SERVICE_NAME_LABEL,
};
use kubefork_common::naming::truncate_name;
use kubefork_common::{as_typed, Result};

/// Name of the copy of `service` made for `fork`
///
/// Already cut to the object name limit, so the copy and the override that
/// routes to it agree on the name.
pub fn copied_service_name(service: &Service, fork: &Fork) -> String {
    truncate_name(&format!("{}-{}", service.name_any(), fork.name_any())).to_string()
}

/// Build the ClusterIP copy of `service` selecting the fork's deployment copies
///
/// A cluster IP already allocated to the copy is kept; it cannot change.
pub fn build_service_copy(
    fork: &Fork,
    service: &Service,
    existing: &BTreeMap<String, Service>,
) -> Service {
    let name = copied_service_name(service, fork);
    let original = service.name_any();

    let cluster_ip = existing
        .get(&name)
        .and_then(|s| s.spec.as_ref())
        .and_then(|s| s.cluster_ip.clone())
        .filter(|ip| !ip.is_empty());

    // Node ports are immutable and not copied.
    let ports: Vec<ServicePort> = service
        .spec
        .iter()
        .flat_map(|s| s.ports.iter().flatten())
        .map(|p| ServicePort {
            name: p.name.clone(),
            protocol: p.protocol.clone(),
            app_protocol: p.app_protocol.clone(),
            port: p.port,
            target_port: p.target_port.clone(),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: fork.metadata.namespace.clone(),
            labels: Some(BTreeMap::from([
                (ORIGINAL_SERVICE_NAME_LABEL.to_string(), original.clone()),
                (FORK_IDENTIFIER_LABEL.to_string(), fork.spec.identifier.clone()),
            ])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            cluster_ip,
            ports: Some(ports).filter(|p| !p.is_empty()),
            selector: Some(BTreeMap::from([
                (routed_from_label(&original), LABEL_TRUE.to_string()),
                (FORK_IDENTIFIER_LABEL.to_string(), fork.spec.identifier.clone()),
            ])),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the override sending the fork's requests for `service` to its copy
pub fn build_route_override(fork: &Fork, service: &Service, header_name: &str) -> RouteOverride {
    let name = copied_service_name(service, fork);
    let mut route_override = RouteOverride::new(
        &name,
        RouteOverrideSpec {
            host: service.name_any(),
            service: name.clone(),
            header_name: header_name.to_string(),
            header_value: fork.spec.identifier.clone(),
        },
    );
    route_override.metadata.namespace = fork.metadata.namespace.clone();
    route_override
}

/// Identity of a copied Service: the original service name label
///
/// Services without the label get the empty key.
pub fn service_copy_identity(obj: &DynamicObject) -> Result<String> {
    Ok(obj
        .labels()
        .get(ORIGINAL_SERVICE_NAME_LABEL)
        .cloned()
        .unwrap_or_default())
}

/// Identity of a RouteOverride: the host it overrides
pub fn route_override_identity(obj: &DynamicObject) -> Result<String> {
    let route_override: RouteOverride = as_typed(obj)?;
    Ok(route_override.spec.host)
}
