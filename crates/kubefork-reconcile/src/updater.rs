//! Updaters: load a parent, build its desired children and refresh them
//!
//! A parent that no longer exists is not an error. Its children are left to
//! owner-reference garbage collection.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::discovery::ApiResource;
use kube::Resource;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use kubefork_common::crd::{Fork, ForkManager, RouteOverride};
use kubefork_common::{
    as_typed, as_typed_all, LabelQuery, NamespacedName, ParentRef, ResourceStore, Result,
};

use crate::mapping::build_mappings;
use crate::microservice::MicroserviceBuilder;
use crate::refresh::Refresher;
use crate::virtual_service::build_virtual_services;

/// Load a typed object by key; `None` when it does not exist
pub(crate) async fn get_typed<K>(
    store: &dyn ResourceStore,
    key: &NamespacedName,
) -> Result<Option<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    store
        .get(&ApiResource::erase::<K>(&()), &key.namespace, &key.name)
        .await?
        .map(|obj| as_typed(&obj))
        .transpose()
}

/// Run `update` for every key, returning the first failure after trying all
async fn update_each<F, Fut>(kind: &str, keys: Vec<NamespacedName>, update: F) -> Result<()>
where
    F: Fn(NamespacedName) -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut first_error = None;
    for key in keys {
        if let Err(e) = update(key.clone()).await {
            warn!(kind, key = %key, error = %e, "update failed");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

/// Keeps the gateway mappings of each ForkManager current
#[derive(Clone)]
pub struct MappingUpdater {
    store: Arc<dyn ResourceStore>,
    refresher: Refresher,
}

impl MappingUpdater {
    /// Create an updater over `store`
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            refresher: Refresher::new(store.clone()),
            store,
        }
    }

    /// Refresh the mappings of one manager
    #[instrument(skip(self), fields(manager = %key))]
    pub async fn update(&self, key: &NamespacedName) -> Result<()> {
        let Some(manager) = get_typed::<ForkManager>(self.store.as_ref(), key).await? else {
            debug!("ForkManager not found, nothing to update");
            return Ok(());
        };

        let forks = self
            .store
            .list_all(&ApiResource::erase::<Fork>(&()), &LabelQuery::everything())
            .await?;
        let forks: Vec<Fork> = as_typed_all(&forks)?;

        let list = build_mappings(&manager, &forks)?;
        info!(mappings = list.items.len(), "refreshing mappings");
        self.refresher.refresh(&ParentRef::of(&manager)?, &list).await
    }

    /// Refresh the mappings of every manager
    pub async fn update_all(&self) -> Result<()> {
        let managers = self
            .store
            .list_all(&ApiResource::erase::<ForkManager>(&()), &LabelQuery::everything())
            .await?;
        let keys = as_typed_all::<ForkManager>(&managers)?
            .iter()
            .map(NamespacedName::of)
            .collect();
        update_each("ForkManager", keys, |key| async move { self.update(&key).await }).await
    }
}

/// Keeps the VirtualService of each Service current
#[derive(Clone)]
pub struct VirtualServiceUpdater {
    store: Arc<dyn ResourceStore>,
    refresher: Refresher,
}

impl VirtualServiceUpdater {
    /// Create an updater over `store`
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            refresher: Refresher::new(store.clone()),
            store,
        }
    }

    /// Refresh the VirtualService of one service
    #[instrument(skip(self), fields(service = %key))]
    pub async fn update(&self, key: &NamespacedName) -> Result<()> {
        let Some(service) = get_typed::<Service>(self.store.as_ref(), key).await? else {
            debug!("Service not found, nothing to update");
            return Ok(());
        };

        let overrides = self
            .store
            .list(
                &ApiResource::erase::<RouteOverride>(&()),
                &key.namespace,
                &LabelQuery::everything(),
            )
            .await?;
        let overrides: Vec<RouteOverride> = as_typed_all(&overrides)?;

        let list = build_virtual_services(&service, &overrides)?;
        self.refresher.refresh(&ParentRef::of(&service)?, &list).await
    }

    /// Refresh the VirtualServices of every service in `namespace`
    pub async fn update_all(&self, namespace: &str) -> Result<()> {
        let services = self
            .store
            .list(
                &ApiResource::erase::<Service>(&()),
                namespace,
                &LabelQuery::everything(),
            )
            .await?;
        let keys = as_typed_all::<Service>(&services)?
            .iter()
            .map(NamespacedName::of)
            .collect();
        update_each("Service", keys, |key| async move { self.update(&key).await }).await
    }
}

/// Keeps the deployment copies, service copies and overrides of each Fork current
#[derive(Clone)]
pub struct MicroserviceUpdater {
    store: Arc<dyn ResourceStore>,
    builder: MicroserviceBuilder,
    refresher: Refresher,
}

impl MicroserviceUpdater {
    /// Create an updater over `store`
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            builder: MicroserviceBuilder::new(store.clone()),
            refresher: Refresher::new(store.clone()),
            store,
        }
    }

    /// Refresh the copies of one fork
    #[instrument(skip(self), fields(fork = %key))]
    pub async fn update(&self, key: &NamespacedName) -> Result<()> {
        match get_typed::<Fork>(self.store.as_ref(), key).await? {
            Some(fork) => self.update_fork(&fork).await,
            None => {
                debug!("Fork not found, nothing to update");
                Ok(())
            }
        }
    }

    /// Refresh the copies of an already loaded fork
    ///
    /// Lists are refreshed in builder order; the first failure stops the pass.
    pub async fn update_fork(&self, fork: &Fork) -> Result<()> {
        let parent = ParentRef::of(fork)?;
        for list in self.builder.build(fork).await? {
            self.refresher.refresh(&parent, &list).await?;
        }
        Ok(())
    }

    /// Refresh the copies of every fork
    pub async fn update_all(&self) -> Result<()> {
        let forks = self
            .store
            .list_all(&ApiResource::erase::<Fork>(&()), &LabelQuery::everything())
            .await?;
        let keys = as_typed_all::<Fork>(&forks)?
            .iter()
            .map(NamespacedName::of)
            .collect();
        update_each("Fork", keys, |key| async move { self.update(&key).await }).await
    }
}
