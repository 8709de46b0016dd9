//! Trigger handling
//!
//! Each entry point takes the namespaced name of the object that changed and
//! runs the updaters affected by it. A vanished subject is treated as a state
//! transition, never as an error.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::discovery::ApiResource;
use tracing::{debug, info, instrument};

use kubefork_common::crd::{Fork, RouteOverride};
use kubefork_common::{NamespacedName, ResourceStore, Result};

use crate::updater::{get_typed, MappingUpdater, MicroserviceUpdater, VirtualServiceUpdater};

/// Routes reconciliation triggers to the updaters
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    mappings: MappingUpdater,
    virtual_services: VirtualServiceUpdater,
    microservices: MicroserviceUpdater,
}

impl Reconciler {
    /// Create a reconciler over `store`
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self {
            mappings: MappingUpdater::new(store.clone()),
            virtual_services: VirtualServiceUpdater::new(store.clone()),
            microservices: MicroserviceUpdater::new(store.clone()),
            store,
        }
    }

    /// A Fork changed, disappeared or reached its deadline
    ///
    /// An expired fork is deleted; its children go with it through owner
    /// references and its mappings are dropped when the fork's deletion
    /// triggers the next pass. Every manager exposes every fork, so a live
    /// fork refreshes the mappings of all of them.
    #[instrument(skip(self, now), fields(fork = %key))]
    pub async fn reconcile_fork(&self, key: &NamespacedName, now: DateTime<Utc>) -> Result<()> {
        let Some(fork) = get_typed::<Fork>(self.store.as_ref(), key).await? else {
            debug!("Fork gone, refreshing all mappings");
            return self.mappings.update_all().await;
        };

        if fork.is_expired(now) {
            info!("fork deadline passed, deleting fork");
            return match self
                .store
                .delete(&ApiResource::erase::<Fork>(&()), &key.namespace, &key.name)
                .await
            {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            };
        }

        fork.manager_ref()?;
        self.mappings.update_all().await?;
        self.microservices.update_fork(&fork).await
    }

    /// A ForkManager changed or disappeared
    #[instrument(skip(self), fields(manager = %key))]
    pub async fn reconcile_fork_manager(&self, key: &NamespacedName) -> Result<()> {
        self.mappings.update(key).await
    }

    /// A RouteOverride changed or disappeared
    ///
    /// Without the object the overridden host is unknown, so every service of
    /// the namespace is refreshed.
    #[instrument(skip(self), fields(route_override = %key))]
    pub async fn reconcile_route_override(&self, key: &NamespacedName) -> Result<()> {
        match get_typed::<RouteOverride>(self.store.as_ref(), key).await? {
            Some(route_override) => {
                let service = NamespacedName::new(&key.namespace, route_override.spec.host);
                self.virtual_services.update(&service).await
            }
            None => {
                debug!("RouteOverride gone, refreshing namespace");
                self.virtual_services.update_all(&key.namespace).await
            }
        }
    }

    /// A Service changed or disappeared
    #[instrument(skip(self), fields(service = %key))]
    pub async fn reconcile_service(&self, key: &NamespacedName) -> Result<()> {
        self.virtual_services.update(key).await
    }
}
