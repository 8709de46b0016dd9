//! DeploymentCopy generation

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::ResourceExt;

use kubefork_common::crd::{ContainerOverride, DeploymentCopy, DeploymentCopySpec, Fork};
use kubefork_common::labels::{routed_from_label, FORK_IDENTIFIER_LABEL, LABEL_TRUE};
use kubefork_common::naming::truncate_name;
use kubefork_common::Result;

const DEFAULT_REPLICAS: i32 = 1;

/// Build the copy of `deployment` requested by `fork`
///
/// `services` are the selected services routing to the deployment; the copy's
/// pods are labelled so each service's copy selects them.
pub fn build_deployment_copy(
    fork: &Fork,
    deployment: &Deployment,
    services: &[String],
) -> DeploymentCopy {
    let deployment_name = deployment.name_any();
    let fork_name = fork.name_any();
    let deployments = fork.spec.deployments.as_ref();
    let template = deployments.and_then(|d| d.template.as_ref());
    let template_metadata = template.and_then(|t| t.metadata.as_ref());

    let mut custom_labels = BTreeMap::from([(
        FORK_IDENTIFIER_LABEL.to_string(),
        fork.spec.identifier.clone(),
    )]);
    for service in services {
        custom_labels.insert(routed_from_label(service), LABEL_TRUE.to_string());
    }
    if let Some(meta) = template_metadata {
        custom_labels.extend(meta.labels.clone());
    }

    let target_containers = template
        .map(|t| {
            t.spec
                .containers
                .iter()
                .map(|c| ContainerOverride {
                    name: c.name.clone(),
                    image: c.image.clone(),
                    env: c.env.clone(),
                })
                .collect()
        })
        .unwrap_or_default();

    DeploymentCopy::new(
        ObjectMeta {
            name: Some(format!("{deployment_name}-{fork_name}")),
            namespace: fork.metadata.namespace.clone(),
            ..Default::default()
        },
        DeploymentCopySpec {
            replicas: deployments
                .and_then(|d| d.replicas)
                .unwrap_or(DEFAULT_REPLICAS),
            target_deployment_name: deployment_name,
            name_suffix: fork_name,
            custom_labels,
            custom_annotations: template_metadata
                .map(|m| m.annotations.clone())
                .unwrap_or_default(),
            target_containers,
            hostname: template.and_then(|t| t.spec.hostname.clone()),
        },
    )
}

/// Identity of a DeploymentCopy: its name, bounded like a stored name
///
/// Desired copies may carry names longer than a stored object can have; the
/// bound makes the desired and the live key agree.
pub fn deployment_copy_identity(obj: &DynamicObject) -> Result<String> {
    Ok(truncate_name(&obj.name_any()).to_string())
}
