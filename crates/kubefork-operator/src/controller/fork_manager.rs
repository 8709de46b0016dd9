//! ForkManager controller
//!
//! Also woken by every Fork change, including deletion. Each manager exposes
//! every fork identifier, so a fork change wakes all known managers.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::runtime::reflector::{ObjectRef, Store};
use kube::ResourceExt;
use tracing::{debug, instrument};

use kubefork_common::crd::{Fork, ForkManager};
use kubefork_common::{Error, NamespacedName};

use super::Context;

/// Reconcile a ForkManager: refresh its gateway mappings
#[instrument(skip(manager, ctx), fields(manager = %manager.name_any()))]
pub async fn reconcile(manager: Arc<ForkManager>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = NamespacedName::of(manager.as_ref());
    ctx.reconciler.reconcile_fork_manager(&key).await?;
    Ok(Action::await_change())
}

/// Mapper waking every manager in `managers` for any fork change
pub fn all_managers(
    managers: Store<ForkManager>,
) -> impl Fn(Fork) -> Vec<ObjectRef<ForkManager>> + Send + Sync + 'static {
    move |fork| {
        let targets: Vec<ObjectRef<ForkManager>> = managers
            .state()
            .iter()
            .map(|m| ObjectRef::from_obj(m.as_ref()))
            .collect();
        debug!(fork = %fork.name_any(), managers = targets.len(), "fork changed, waking managers");
        targets
    }
}
