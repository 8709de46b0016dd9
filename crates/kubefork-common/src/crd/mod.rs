//! Custom Resource Definitions for kubefork
//!
//! Intent CRDs owned by this project (`Fork`, `ForkManager`, `RouteOverride`)
//! are derived with `kube::CustomResource`. Resources owned by other
//! controllers (gateway `Mapping`, mesh `VirtualService`, `DeploymentCopy`) are
//! plain serde types addressed through [`crate::HasApiResource`].

mod deployment_copy;
mod fork;
mod fork_manager;
mod mapping;
mod route_override;
mod virtual_service;

pub use deployment_copy::{ContainerOverride, DeploymentCopy, DeploymentCopySpec};
pub use fork::{
    Fork, ForkDeployments, ForkPodSpec, ForkPodTemplate, ForkServices, ForkSpec,
    ForkTemplateMetadata, GatewayOptions,
};
pub use fork_manager::{ForkManager, ForkManagerSpec, Upstream};
pub use mapping::{Mapping, MappingSpec};
pub use route_override::{RouteOverride, RouteOverrideSpec};
pub use virtual_service::{
    Destination, HttpMatchRequest, HttpRoute, HttpRouteDestination, StringMatch, VirtualService,
    VirtualServiceSpec,
};
