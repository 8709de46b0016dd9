//! Per-fork microservice copies
//!
//! A Fork selects services and, optionally, deployments. Every selected
//! deployment that one of the selected services routes to is copied with the
//! fork's overrides, every selected service gets a ClusterIP copy selecting the
//! copied pods, and a RouteOverride sends requests carrying the fork's header
//! to the copy.

mod deployment;
mod service;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::discovery::ApiResource;
use kube::ResourceExt;
use tracing::{debug, instrument};

use kubefork_common::crd::{DeploymentCopy, Fork, ForkManager, RouteOverride};
use kubefork_common::labels::FORK_IDENTIFIER_LABEL;
use kubefork_common::selector::routes_to;
use kubefork_common::{
    as_typed, as_typed_all, Error, LabelQuery, NamespacedName, ResourceStore, Result,
};

use crate::refresh::DesiredList;

pub use deployment::{build_deployment_copy, deployment_copy_identity};
pub use service::{
    build_route_override, build_service_copy, copied_service_name, route_override_identity,
    service_copy_identity,
};

/// Everything read from the cluster to build one fork's copies
struct ForkedApp<'a> {
    fork: &'a Fork,
    header_key: String,
    services: Vec<Service>,
    existing_copies: BTreeMap<String, Service>,
    /// Deployments to copy, by name, with the selected services routing to each
    deployments: BTreeMap<String, (Deployment, Vec<String>)>,
}

impl ForkedApp<'_> {
    fn desired_lists(&self) -> Result<Vec<DesiredList>> {
        let copies: Vec<DeploymentCopy> = self
            .deployments
            .values()
            .map(|(deployment, services)| build_deployment_copy(self.fork, deployment, services))
            .collect();

        let service_copies: Vec<Service> = self
            .services
            .iter()
            .map(|s| build_service_copy(self.fork, s, &self.existing_copies))
            .collect();

        let overrides: Vec<RouteOverride> = self
            .services
            .iter()
            .map(|s| build_route_override(self.fork, s, &self.header_key))
            .collect();

        Ok(vec![
            DesiredList::of(&copies, deployment_copy_identity)?,
            DesiredList::of_resources(&service_copies, service_copy_identity)?,
            DesiredList::of_resources(&overrides, route_override_identity)?,
        ])
    }
}

/// Builds the desired DeploymentCopy, Service and RouteOverride lists of a fork
#[derive(Clone)]
pub struct MicroserviceBuilder {
    store: Arc<dyn ResourceStore>,
}

impl MicroserviceBuilder {
    /// Create a builder reading through `store`
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Build the three desired lists of `fork`
    ///
    /// Lists come in refresh order: deployment copies, service copies, route
    /// overrides. All are empty when the fork selects no services.
    #[instrument(skip_all, fields(fork = %NamespacedName::of(fork)))]
    pub async fn build(&self, fork: &Fork) -> Result<Vec<DesiredList>> {
        self.collect(fork).await?.desired_lists()
    }

    /// Read the cluster state a fork's copies are built from
    ///
    /// A selected service without a selector routes to no deployment. An
    /// empty selector would formally match every pod of the namespace;
    /// copying all of them is deliberately not done.
    async fn collect<'a>(&self, fork: &'a Fork) -> Result<ForkedApp<'a>> {
        let namespace = fork.namespace().ok_or_else(|| {
            Error::validation_for_field(fork.name_any(), "metadata.namespace", "fork is not namespaced")
        })?;

        let header_key = self.header_key(fork).await?;

        let mut services = self.selected_services(fork, &namespace).await?;
        services.sort_by_key(|s| s.name_any());

        let existing_copies = self.existing_copies(fork, &namespace).await?;

        let candidates = if services.is_empty() {
            Vec::new()
        } else {
            self.selected_deployments(fork, &namespace).await?
        };

        let mut deployments: BTreeMap<String, (Deployment, Vec<String>)> = BTreeMap::new();
        let no_labels = BTreeMap::new();
        for service in &services {
            let Some(selector) = service
                .spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .filter(|s| !s.is_empty())
            else {
                debug!(service = %service.name_any(), "service has no selector, no deployment to copy");
                continue;
            };

            for candidate in &candidates {
                let pod_labels = candidate
                    .spec
                    .as_ref()
                    .and_then(|s| s.template.metadata.as_ref())
                    .and_then(|m| m.labels.as_ref())
                    .unwrap_or(&no_labels);
                if routes_to(selector, pod_labels) {
                    deployments
                        .entry(candidate.name_any())
                        .or_insert_with(|| (candidate.clone(), Vec::new()))
                        .1
                        .push(service.name_any());
                }
            }
        }

        debug!(
            services = services.len(),
            deployments = deployments.len(),
            "collected fork targets"
        );

        Ok(ForkedApp {
            fork,
            header_key,
            services,
            existing_copies,
            deployments,
        })
    }

    /// Header key of the ForkManager the fork belongs to
    async fn header_key(&self, fork: &Fork) -> Result<String> {
        let manager_ref = fork.manager_ref()?;
        let obj = self
            .store
            .get(
                &ApiResource::erase::<ForkManager>(&()),
                &manager_ref.namespace,
                &manager_ref.name,
            )
            .await?
            .ok_or_else(|| {
                Error::internal_with_context(
                    "microservice",
                    format!(
                        "ForkManager {manager_ref} referenced by {} not found",
                        NamespacedName::of(fork)
                    ),
                )
            })?;
        let manager: ForkManager = as_typed(&obj)?;
        Ok(manager.spec.header_key)
    }

    async fn selected_services(&self, fork: &Fork, namespace: &str) -> Result<Vec<Service>> {
        let Some(selector) = fork.spec.services.as_ref().and_then(|s| s.selector.as_ref()) else {
            return Ok(Vec::new());
        };
        let query = LabelQuery::from_label_selector(selector)?;
        let objs = self
            .store
            .list(&ApiResource::erase::<Service>(&()), namespace, &query)
            .await?;
        as_typed_all(&objs)
    }

    async fn existing_copies(
        &self,
        fork: &Fork,
        namespace: &str,
    ) -> Result<BTreeMap<String, Service>> {
        let query = LabelQuery::everything().with_equals(FORK_IDENTIFIER_LABEL, &fork.spec.identifier);
        let objs = self
            .store
            .list(&ApiResource::erase::<Service>(&()), namespace, &query)
            .await?;
        Ok(as_typed_all::<Service>(&objs)?
            .into_iter()
            .map(|s| (s.name_any(), s))
            .collect())
    }

    async fn selected_deployments(&self, fork: &Fork, namespace: &str) -> Result<Vec<Deployment>> {
        let Some(selector) = fork
            .spec
            .deployments
            .as_ref()
            .and_then(|d| d.selector.as_ref())
        else {
            return Ok(Vec::new());
        };
        let query = LabelQuery::from_label_selector(selector)?;
        let objs = self
            .store
            .list(&ApiResource::erase::<Deployment>(&()), namespace, &query)
            .await?;
        as_typed_all(&objs)
    }
}
