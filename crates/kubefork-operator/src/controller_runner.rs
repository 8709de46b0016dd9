//! Controller runner - builds the controller futures
//!
//! Construction is kept apart from `main` so the wiring of triggers to
//! reconcile functions stays in one place.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use kubefork_common::crd::{Fork, ForkManager, RouteOverride};
use kubefork_common::NamespacedName;

use crate::controller::{self, error_policy, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller future ready to be driven
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Api over one namespace, or over all namespaces when none is given
fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Turn a deadline trigger into a Fork reference
pub fn fork_trigger(key: NamespacedName) -> ObjectRef<Fork> {
    ObjectRef::new(&key.name).within(&key.namespace)
}

/// Build the Fork, ForkManager, RouteOverride and Service controllers
///
/// `deadline_triggers` carries the keys of forks whose deadline passed; each
/// one schedules a Fork reconciliation.
pub fn build_controllers(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
    deadline_triggers: mpsc::Receiver<NamespacedName>,
) -> Vec<ControllerFuture> {
    tracing::info!(namespace = namespace.unwrap_or("*"), "starting controllers");

    tracing::info!("- Fork controller");
    let fork_ctrl = Controller::new(scoped_api::<Fork>(&client, namespace), watcher_config())
        .reconcile_on(ReceiverStream::new(deadline_triggers).map(fork_trigger))
        .shutdown_on_signal()
        .run(controller::fork::reconcile, error_policy, ctx.clone())
        .for_each(log_reconcile_result("Fork"));

    tracing::info!("- ForkManager controller");
    let manager_ctrl = Controller::new(
        scoped_api::<ForkManager>(&client, namespace),
        watcher_config(),
    );
    let managers = manager_ctrl.store();
    let manager_ctrl = manager_ctrl
        .watches(
            scoped_api::<Fork>(&client, namespace),
            watcher_config(),
            controller::fork_manager::all_managers(managers),
        )
        .shutdown_on_signal()
        .run(controller::fork_manager::reconcile, error_policy, ctx.clone())
        .for_each(log_reconcile_result("ForkManager"));

    tracing::info!("- RouteOverride controller");
    let override_ctrl = Controller::new(
        scoped_api::<RouteOverride>(&client, namespace),
        watcher_config(),
    )
    .shutdown_on_signal()
    .run(controller::route_override::reconcile, error_policy, ctx.clone())
    .for_each(log_reconcile_result("RouteOverride"));

    tracing::info!("- Service controller");
    let service_ctrl = Controller::new(scoped_api::<Service>(&client, namespace), watcher_config())
        .watches(
            scoped_api::<RouteOverride>(&client, namespace),
            watcher_config(),
            controller::service::host_of,
        )
        .shutdown_on_signal()
        .run(controller::service::reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Service"));

    vec![
        Box::pin(fork_ctrl),
        Box::pin(manager_ctrl),
        Box::pin(override_ctrl),
        Box::pin(service_ctrl),
    ]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(object) => tracing::debug!(?object, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_trigger_addresses_the_fork() {
        let target = fork_trigger(NamespacedName::new("team-a", "dev"));
        assert_eq!(target.name, "dev");
        assert_eq!(target.namespace.as_deref(), Some("team-a"));
    }
}
