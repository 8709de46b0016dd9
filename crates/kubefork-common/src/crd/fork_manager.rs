//! ForkManager CRD: gateway configuration shared by a set of forks

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// ForkManager describes how forked traffic enters through the gateway.
///
/// Each fork referencing a manager gets one gateway mapping per upstream,
/// matching `<identifier>.<upstream host>` and tagging requests with the
/// manager's header key.
///
/// Example:
/// ```yaml
/// apiVersion: fork.kubefork.dev/v1beta1
/// kind: ForkManager
/// metadata:
///   name: main
///   namespace: gateway
/// spec:
///   gatewayId: edge
///   headerKey: x-fork-identifier
///   upstreams:
///     - host: api.example.com
///       original: api.default.svc.cluster.local:80
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fork.kubefork.dev",
    version = "v1beta1",
    kind = "ForkManager",
    namespaced,
    printcolumn = r#"{"name":"Gateway","type":"string","jsonPath":".spec.gatewayId"}"#,
    printcolumn = r#"{"name":"Header","type":"string","jsonPath":".spec.headerKey"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ForkManagerSpec {
    /// Gateway instance the generated mappings are scoped to
    pub gateway_id: String,

    /// Header carrying the fork identifier downstream
    pub header_key: String,

    /// Hosts exposed per fork
    #[serde(default)]
    pub upstreams: Vec<Upstream>,
}

/// One upstream host routed per fork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    /// Public host; forks are served on `<identifier>.<host>`
    pub host: String,

    /// In-cluster service to forward to instead of `https://<host>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<String>,

    /// Host header sent upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_rewrite: Option<String>,
}

impl Upstream {
    /// Service the gateway forwards to
    pub fn service(&self) -> String {
        match self.original.as_deref().filter(|o| !o.is_empty()) {
            Some(original) => original.to_string(),
            None => format!("https://{}", self.host),
        }
    }

    /// Host header rewrite, if any
    ///
    /// An explicit rewrite wins; otherwise the original service without its
    /// port is used.
    pub fn host_rewrite(&self) -> Option<String> {
        if let Some(rewrite) = self.host_rewrite.as_deref().filter(|r| !r.is_empty()) {
            return Some(rewrite.to_string());
        }
        self.original
            .as_deref()
            .filter(|o| !o.is_empty())
            .map(|o| o.split(':').next().unwrap_or(o).to_string())
    }
}
