//! Desired-state reconciliation for kubefork
//!
//! Builders derive the children each parent should own, the [`Refresher`]
//! converges the cluster to them, and the [`Reconciler`] maps change triggers
//! onto the affected parents. The [`DeadlineWatcher`] turns expired forks into
//! triggers.

#![deny(missing_docs)]

pub mod deadline;
pub mod driver;
pub mod mapping;
pub mod microservice;
pub mod refresh;
pub mod updater;
pub mod virtual_service;

pub use deadline::{overdue_forks, DeadlineWatcher, DEFAULT_CHECK_INTERVAL};
pub use driver::Reconciler;
pub use mapping::build_mappings;
pub use microservice::MicroserviceBuilder;
pub use refresh::{DesiredList, IdentityFn, Refresher};
pub use updater::{MappingUpdater, MicroserviceUpdater, VirtualServiceUpdater};
pub use virtual_service::build_virtual_services;
