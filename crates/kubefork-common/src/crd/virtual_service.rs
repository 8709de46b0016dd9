//! Istio VirtualService (networking.istio.io/v1beta1)

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::kube_utils::HasApiResource;

/// Ordered HTTP routing for one service host
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualService {
    /// API version
    #[serde(default = "VirtualService::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "VirtualService::kind")]
    pub kind: String,
    /// Metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: VirtualServiceSpec,
}

impl HasApiResource for VirtualService {
    const API_VERSION: &'static str = "networking.istio.io/v1beta1";
    const KIND: &'static str = "VirtualService";
}

impl VirtualService {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new VirtualService
    pub fn new(metadata: ObjectMeta, spec: VirtualServiceSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// VirtualService spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VirtualServiceSpec {
    /// Destination hosts this routing applies to
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Routes, evaluated in order; first match wins
    #[serde(default)]
    pub http: Vec<HttpRoute>,
}

/// One HTTP route
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpRoute {
    /// Match conditions; empty matches everything
    #[serde(rename = "match", default, skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpMatchRequest>,
    /// Destinations
    #[serde(default)]
    pub route: Vec<HttpRouteDestination>,
}

impl HttpRoute {
    /// Route requests whose `header` equals `value` to `host`
    pub fn header_exact(header: &str, value: &str, host: &str) -> Self {
        Self {
            matches: vec![HttpMatchRequest {
                headers: BTreeMap::from([(
                    header.to_string(),
                    StringMatch {
                        exact: Some(value.to_string()),
                    },
                )]),
            }],
            route: vec![HttpRouteDestination::to(host)],
        }
    }

    /// Route every request to `host`
    pub fn default_to(host: &str) -> Self {
        Self {
            matches: Vec::new(),
            route: vec![HttpRouteDestination::to(host)],
        }
    }
}

/// Request match
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpMatchRequest {
    /// Header matches, all of which must hold
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, StringMatch>,
}

/// String match
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct StringMatch {
    /// Exact value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,
}

/// Weighted destination of a route
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpRouteDestination {
    /// Destination service
    pub destination: Destination,
}

impl HttpRouteDestination {
    fn to(host: &str) -> Self {
        Self {
            destination: Destination {
                host: host.to_string(),
            },
        }
    }
}

/// Destination service
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    /// Service name
    pub host: String,
}
