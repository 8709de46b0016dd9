//! Common types for kubefork: CRDs, errors, selectors and resource-store access

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod naming;
pub mod selector;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub use kube_utils::{as_typed, as_typed_all, to_dynamic, HasApiResource, NamespacedName, ParentRef};
pub use selector::LabelQuery;
pub use store::{KubeStore, ResourceStore};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by all kubefork intent CRDs
pub const FORK_API_GROUP: &str = "fork.kubefork.dev";

/// Field manager / controller name reported to the API server
pub const CONTROLLER_NAME: &str = "kubefork-controller";
