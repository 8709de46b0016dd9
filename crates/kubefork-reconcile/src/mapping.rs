//! Gateway mapping generation
//!
//! A ForkManager exposes every fork identifier on each of its upstream hosts:
//! identifier `x` on upstream `api.example.com` is served at
//! `x.api.example.com`, forwarded to the upstream with the manager's header
//! set to `x`. Forks sharing an identifier share its mappings; their gateway
//! options are merged in namespace/name order, later forks overriding earlier
//! ones header by header.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::ResourceExt;
use tracing::debug;

use kubefork_common::crd::{Fork, ForkManager, Mapping, MappingSpec, Upstream};
use kubefork_common::labels::{FORK_IDENTIFIER_LABEL, MANAGER_LABEL, UPSTREAM_HOST_ANNOTATION};
use kubefork_common::{NamespacedName, Result};

use crate::refresh::DesiredList;

/// Request timeout of generated mappings
pub const MAPPING_TIMEOUT_MS: u64 = 90_000;

/// Header carrying the original authority to the upstream
pub const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

const FORWARDED_HOST_VALUE: &str = "%REQ(:authority)%";
const DEFAULT_UPGRADE: &str = "websocket";

/// Build the desired mappings of `manager` from every fork in the store
///
/// The fork's own `manager` reference does not narrow this: each manager
/// exposes every identifier on each of its upstreams.
pub fn build_mappings(manager: &ForkManager, forks: &[Fork]) -> Result<DesiredList> {
    let mut by_identifier: BTreeMap<&str, Vec<&Fork>> = BTreeMap::new();
    for fork in forks {
        by_identifier
            .entry(fork.spec.identifier.as_str())
            .or_default()
            .push(fork);
    }

    let mut mappings = Vec::new();
    for (identifier, mut group) in by_identifier {
        group.sort_by_key(|f| NamespacedName::of(*f));
        for upstream in &manager.spec.upstreams {
            mappings.push(build_mapping(manager, upstream, identifier, &group));
        }
    }

    debug!(
        manager = %NamespacedName::of(manager),
        mappings = mappings.len(),
        "built gateway mappings"
    );
    DesiredList::of(&mappings, mapping_identity)
}

fn build_mapping(
    manager: &ForkManager,
    upstream: &Upstream,
    identifier: &str,
    forks: &[&Fork],
) -> Mapping {
    let mut headers = BTreeMap::from([
        (manager.spec.header_key.clone(), identifier.to_string()),
        (
            FORWARDED_HOST_HEADER.to_string(),
            FORWARDED_HOST_VALUE.to_string(),
        ),
    ]);
    let mut upgrades = BTreeSet::from([DEFAULT_UPGRADE.to_string()]);
    for fork in forks {
        headers.extend(fork.extra_headers().map(|(k, v)| (k.clone(), v.clone())));
        upgrades.extend(fork.extra_upgrades().cloned());
    }

    let metadata = ObjectMeta {
        name: Some(format!("{}-{}", upstream.host, identifier).replace('.', "-")),
        namespace: manager.namespace(),
        labels: Some(BTreeMap::from([
            (MANAGER_LABEL.to_string(), manager.name_any()),
            (FORK_IDENTIFIER_LABEL.to_string(), identifier.to_string()),
        ])),
        annotations: Some(BTreeMap::from([(
            UPSTREAM_HOST_ANNOTATION.to_string(),
            upstream.host.clone(),
        )])),
        ..Default::default()
    };

    Mapping::new(
        metadata,
        MappingSpec {
            host: format!("{}.{}", identifier, upstream.host),
            prefix: "/".to_string(),
            rewrite: Some(String::new()),
            service: upstream.service(),
            host_rewrite: upstream.host_rewrite(),
            timeout_ms: MAPPING_TIMEOUT_MS,
            ambassador_id: vec![manager.spec.gateway_id.clone()],
            add_request_headers: headers,
            allow_upgrade: upgrades.into_iter().collect(),
        },
    )
}

/// Identity of a mapping: `<upstream host>|<identifier>`
///
/// Mappings missing either marker get the empty key, which is never desired,
/// so the refresher removes them.
pub fn mapping_identity(obj: &DynamicObject) -> Result<String> {
    let upstream = obj.annotations().get(UPSTREAM_HOST_ANNOTATION);
    let identifier = obj.labels().get(FORK_IDENTIFIER_LABEL);
    Ok(match (upstream, identifier) {
        (Some(upstream), Some(identifier)) => format!("{upstream}|{identifier}"),
        _ => String::new(),
    })
}
