//! RouteOverride controller

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::instrument;

use kubefork_common::crd::RouteOverride;
use kubefork_common::{Error, NamespacedName};

use super::Context;

/// Reconcile a RouteOverride: refresh the VirtualService of its host
#[instrument(skip(route_override, ctx), fields(route_override = %route_override.name_any()))]
pub async fn reconcile(
    route_override: Arc<RouteOverride>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let key = NamespacedName::of(route_override.as_ref());
    ctx.reconciler.reconcile_route_override(&key).await?;
    Ok(Action::await_change())
}
