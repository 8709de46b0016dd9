//! Gateway Mapping (getambassador.io/v2)
//!
//! Only the fields kubefork writes are modelled. The gateway's schema uses
//! snake_case field names.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::kube_utils::HasApiResource;

/// Gateway route for one fork identifier on one upstream host
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    /// API version
    #[serde(default = "Mapping::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "Mapping::kind")]
    pub kind: String,
    /// Metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: MappingSpec,
}

impl HasApiResource for Mapping {
    const API_VERSION: &'static str = "getambassador.io/v2";
    const KIND: &'static str = "Mapping";
}

impl Mapping {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new Mapping
    pub fn new(metadata: ObjectMeta, spec: MappingSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// Mapping spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MappingSpec {
    /// Host to match
    #[serde(default)]
    pub host: String,
    /// Path prefix to match
    #[serde(default)]
    pub prefix: String,
    /// Prefix rewrite; the empty string keeps the path unchanged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewrite: Option<String>,
    /// Upstream service
    #[serde(default)]
    pub service: String,
    /// Host header sent upstream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_rewrite: Option<String>,
    /// Request timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: u64,
    /// Gateway instances this mapping applies to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambassador_id: Vec<String>,
    /// Headers added to forwarded requests
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add_request_headers: BTreeMap<String, String>,
    /// Allowed protocol upgrades
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_upgrade: Vec<String>,
}
