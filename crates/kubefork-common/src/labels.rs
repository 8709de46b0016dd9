//! Label and annotation keys written onto generated resources
//!
//! These keys are how generated children are correlated back to the fork,
//! manager or service they were derived from.

/// Marks every object generated for a fork with the fork identifier
pub const FORK_IDENTIFIER_LABEL: &str = "fork.kubefork.dev/identifier";

/// Name of the service a copied service was derived from
pub const ORIGINAL_SERVICE_NAME_LABEL: &str = "fork.kubefork.dev/original-service-name";

/// Name of the ForkManager a gateway mapping was generated by
pub const MANAGER_LABEL: &str = "fork.kubefork.dev/manager";

/// Name of the service a VirtualService routes for
pub const VIRTUAL_SERVICE_LABEL: &str = "fork.kubefork.dev/service";

/// Upstream host a gateway mapping forwards to
pub const UPSTREAM_HOST_ANNOTATION: &str = "fork.kubefork.dev/upstream-host";

const ROUTED_FROM_LABEL_PREFIX: &str = "fork.kubefork.dev/routed-from";

/// Value used for boolean marker labels
pub const LABEL_TRUE: &str = "true";

/// Label key marking pods that receive traffic from a copied service
///
/// The copied service selects on this key, and the deployment copy carries it,
/// one per service that routes to the original deployment.
pub fn routed_from_label(original_service: &str) -> String {
    format!("{ROUTED_FROM_LABEL_PREFIX}-{original_service}")
}
