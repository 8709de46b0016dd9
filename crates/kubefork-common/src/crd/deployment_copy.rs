//! DeploymentCopy (duplication.kubefork.dev/v1beta1)
//!
//! Consumed by the deployment duplicator, which runs a copy of the target
//! deployment with the given overrides.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::kube_utils::HasApiResource;

/// Request to run a copy of a deployment
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCopy {
    /// API version
    #[serde(default = "DeploymentCopy::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "DeploymentCopy::kind")]
    pub kind: String,
    /// Metadata
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: DeploymentCopySpec,
}

impl HasApiResource for DeploymentCopy {
    const API_VERSION: &'static str = "duplication.kubefork.dev/v1beta1";
    const KIND: &'static str = "DeploymentCopy";
}

impl DeploymentCopy {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new DeploymentCopy
    pub fn new(metadata: ObjectMeta, spec: DeploymentCopySpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// DeploymentCopy spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentCopySpec {
    /// Replicas of the copy
    pub replicas: i32,
    /// Deployment to copy
    pub target_deployment_name: String,
    /// Suffix appended to the copy's name
    pub name_suffix: String,
    /// Labels added to the copy and its pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_labels: BTreeMap<String, String>,
    /// Annotations added to the copy's pods
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_annotations: BTreeMap<String, String>,
    /// Container overrides, matched by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_containers: Vec<ContainerOverride>,
    /// Hostname of the copied pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Image and environment override of one container
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ContainerOverride {
    /// Container name in the target deployment
    pub name: String,
    /// Replacement image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Replacement environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<EnvVar>>,
}
