//! Fork CRD: a request to run a private copy of part of an application
//!
//! A Fork selects services and the deployments behind them, and asks for a
//! copy of each to be run with its own identifier. Requests carrying that
//! identifier (in the manager's header) are routed to the copies.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, NamespacedName};

/// Fork requests copies of the selected services and deployments.
///
/// Example:
/// ```yaml
/// apiVersion: fork.kubefork.dev/v1beta1
/// kind: Fork
/// metadata:
///   name: alice-login-fix
///   namespace: team-a
/// spec:
///   manager: gateway/main
///   identifier: alice-login-fix
///   deadline: "2026-11-01T00:00:00Z"
///   services:
///     selector:
///       matchLabels:
///         app: login
///   deployments:
///     selector:
///       matchLabels:
///         app: login
///     template:
///       spec:
///         containers:
///           - name: login
///             image: registry.example.com/login:fix
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "fork.kubefork.dev",
    version = "v1beta1",
    kind = "Fork",
    namespaced,
    printcolumn = r#"{"name":"Identifier","type":"string","jsonPath":".spec.identifier"}"#,
    printcolumn = r#"{"name":"Manager","type":"string","jsonPath":".spec.manager"}"#,
    printcolumn = r#"{"name":"Deadline","type":"date","jsonPath":".spec.deadline"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ForkSpec {
    /// ForkManager handling this fork, as `namespace/name`
    pub manager: String,

    /// Routing identifier; several forks may share one
    pub identifier: String,

    /// The fork is deleted once this instant has passed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Time>,

    /// Extra gateway settings merged into the generated mappings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_options: Option<GatewayOptions>,

    /// Services to copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ForkServices>,

    /// Deployments to copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployments: Option<ForkDeployments>,
}

/// Per-fork gateway options
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOptions {
    /// Headers added to every request routed through the mapping
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add_request_headers: BTreeMap<String, String>,

    /// Protocol upgrades allowed in addition to websocket
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_upgrade: Vec<String>,
}

/// Service selection of a fork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForkServices {
    /// Services matching this selector are copied; absent selects nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

/// Deployment selection and overrides of a fork
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForkDeployments {
    /// Deployments matching this selector are candidates for copying
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    /// Overrides applied to every copy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<ForkPodTemplate>,

    /// Replica count of each copy (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Pod template overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForkPodTemplate {
    /// Labels and annotations added to the copies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ForkTemplateMetadata>,

    /// Container and hostname overrides
    #[serde(default)]
    pub spec: ForkPodSpec,
}

/// Labels and annotations of a pod template override
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForkTemplateMetadata {
    /// Extra labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Pod spec overrides
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForkPodSpec {
    /// Containers to override; only name, image and env are used
    #[serde(default)]
    pub containers: Vec<Container>,

    /// Hostname of the copied pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl Fork {
    /// Parse `spec.manager` into the ForkManager it references
    pub fn manager_ref(&self) -> Result<NamespacedName, Error> {
        self.spec.manager.parse::<NamespacedName>().map_err(|e| {
            Error::validation_for_field(
                NamespacedName::of(self).to_string(),
                "spec.manager",
                e.to_string(),
            )
        })
    }

    /// Whether the deadline lies strictly before `now`
    ///
    /// Forks without a deadline never expire.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.spec.deadline.as_ref().is_some_and(|d| d.0 < now)
    }

    /// Headers this fork adds to its mappings
    pub fn extra_headers(&self) -> impl Iterator<Item = (&String, &String)> {
        self.spec
            .gateway_options
            .iter()
            .flat_map(|o| o.add_request_headers.iter())
    }

    /// Upgrades this fork allows on its mappings
    pub fn extra_upgrades(&self) -> impl Iterator<Item = &String> {
        self.spec
            .gateway_options
            .iter()
            .flat_map(|o| o.allow_upgrade.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kube::CustomResourceExt;

    fn fork(manager: &str, deadline: Option<DateTime<Utc>>) -> Fork {
        let mut f = Fork::new(
            "alice",
            ForkSpec {
                manager: manager.to_string(),
                identifier: "alice".to_string(),
                deadline: deadline.map(Time),
                gateway_options: None,
                services: None,
                deployments: None,
            },
        );
        f.metadata.namespace = Some("team-a".to_string());
        f
    }

    #[test]
    fn manager_reference_is_parsed() {
        let parsed = fork("gateway/main", None).manager_ref().unwrap();
        assert_eq!(parsed, NamespacedName::new("gateway", "main"));
    }

    /// Story: a manager reference without a namespace is a validation
    /// failure naming the fork and the field
    #[test]
    fn story_bad_manager_reference_names_field() {
        let err = fork("main", None).manager_ref().unwrap_err();
        match err {
            Error::Validation {
                resource, field, ..
            } => {
                assert_eq!(resource, "team-a/alice");
                assert_eq!(field.as_deref(), Some("spec.manager"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn expiry_is_strict() {
        let deadline = Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap();
        let f = fork("gateway/main", Some(deadline));

        assert!(!f.is_expired(deadline));
        assert!(!f.is_expired(deadline - chrono::Duration::seconds(1)));
        assert!(f.is_expired(deadline + chrono::Duration::seconds(1)));
        assert!(!fork("gateway/main", None).is_expired(deadline));
    }

    #[test]
    fn spec_deserializes_from_camel_case() {
        let spec: ForkSpec = serde_json::from_value(serde_json::json!({
            "manager": "gateway/main",
            "identifier": "x",
            "deadline": "2026-11-01T00:00:00Z",
            "gatewayOptions": {
                "addRequestHeaders": {"h1": "v1"},
                "allowUpgrade": ["spdy/3.1"]
            },
            "deployments": {
                "replicas": 2,
                "template": {
                    "metadata": {"labels": {"debug": "true"}},
                    "spec": {"containers": [{"name": "app", "image": "app:fix"}]}
                }
            }
        }))
        .unwrap();

        assert!(spec.deadline.is_some());
        let deployments = spec.deployments.unwrap();
        assert_eq!(deployments.replicas, Some(2));
        let template = deployments.template.unwrap();
        assert_eq!(template.spec.containers[0].image.as_deref(), Some("app:fix"));
        assert_eq!(
            spec.gateway_options.unwrap().allow_upgrade,
            vec!["spdy/3.1".to_string()]
        );
    }

    #[test]
    fn crd_is_namespaced_in_fork_group() {
        let crd = Fork::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("forks.fork.kubefork.dev"));
        assert_eq!(crd.spec.scope, "Namespaced");
    }
}
