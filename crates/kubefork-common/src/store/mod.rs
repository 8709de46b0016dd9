//! Resource store access
//!
//! Reconciliation reads and writes children through [`ResourceStore`], a small
//! capability over dynamic objects addressed by an `ApiResource`. Production
//! code uses [`KubeStore`]; tests use the in-memory store or a mock.

mod client;
#[cfg(any(test, feature = "test-util"))]
mod memory;

use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;

#[cfg(any(test, feature = "test-util"))]
use mockall::automock;

use crate::{LabelQuery, Result};

pub use client::KubeStore;
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryStore;

/// Trait abstracting resource storage operations
///
/// This trait allows mocking the API server in tests while using the real
/// client in production. All operations are namespaced except `list_all`.
#[cfg_attr(any(test, feature = "test-util"), automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get an object by name; `None` when it does not exist
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// List objects in a namespace matching a label query
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        query: &LabelQuery,
    ) -> Result<Vec<DynamicObject>>;

    /// List objects in every namespace matching a label query
    async fn list_all(&self, resource: &ApiResource, query: &LabelQuery)
        -> Result<Vec<DynamicObject>>;

    /// Create a new object; fails with a conflict if the name is taken
    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an existing object
    ///
    /// The object's resourceVersion must match the stored one.
    async fn replace(&self, resource: &ApiResource, obj: &DynamicObject)
        -> Result<DynamicObject>;

    /// Delete an object by name
    async fn delete(&self, resource: &ApiResource, namespace: &str, name: &str) -> Result<()>;
}
