//! RouteOverride CRD: send requests carrying a header to another service

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// RouteOverride diverts matching requests for `host` to `service`.
///
/// All overrides for one host are folded into a single ordered
/// VirtualService named after that host. Forks generate one override per
/// copied service; they can also be written by hand.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fork.kubefork.dev",
    version = "v1beta1",
    kind = "RouteOverride",
    namespaced,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.service"}"#,
    printcolumn = r#"{"name":"Value","type":"string","jsonPath":".spec.headerValue"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RouteOverrideSpec {
    /// Service whose traffic is overridden
    pub host: String,

    /// Service receiving the matching requests
    pub service: String,

    /// Header to match
    pub header_name: String,

    /// Exact header value to match; an empty value disables the override
    #[serde(default)]
    pub header_value: String,
}

impl RouteOverride {
    /// Whether this override contributes a route for `service`
    pub fn applies_to(&self, service: &str) -> bool {
        self.spec.host == service && !self.spec.header_value.is_empty()
    }
}
