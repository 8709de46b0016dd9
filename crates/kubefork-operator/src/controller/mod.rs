//! Reconcile functions of the kubefork controllers
//!
//! Each controller turns the object it is woken for into a namespaced name and
//! hands it to the shared [`Reconciler`]. Children are never read from the
//! watch cache; the reconciler always works against the API server.

pub mod fork;
pub mod fork_manager;
pub mod route_override;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{error, warn};

use kubefork_common::Error;
use kubefork_reconcile::Reconciler;

/// State shared by all controllers
pub struct Context {
    /// Trigger entry points
    pub reconciler: Reconciler,
    /// Delay before a failed reconciliation is retried
    pub requeue_after: Duration,
}

impl Context {
    /// Create a context
    pub fn new(reconciler: Reconciler, requeue_after: Duration) -> Self {
        Self {
            reconciler,
            requeue_after,
        }
    }
}

/// Log a failed reconciliation and decide when to retry
///
/// Transient failures are retried after the configured delay. Invalid input
/// waits for the object to change.
pub fn error_policy<K: ResourceExt>(obj: Arc<K>, error: &Error, ctx: Arc<Context>) -> Action {
    let name = format!("{}/{}", obj.namespace().unwrap_or_default(), obj.name_any());
    if error.is_retryable() {
        error!(?error, object = %name, "reconciliation failed, requeueing");
        Action::requeue(ctx.requeue_after)
    } else {
        warn!(error = %error, object = %name, "reconciliation rejected, waiting for a change");
        Action::await_change()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use kubefork_common::crd::{Fork, ForkSpec};
    use kubefork_common::store::MemoryStore;

    fn fork() -> Arc<Fork> {
        let mut f = Fork::new(
            "dev",
            ForkSpec {
                manager: "gateway/main".to_string(),
                identifier: "alice".to_string(),
                deadline: None,
                gateway_options: None,
                services: None,
                deployments: None,
            },
        );
        f.metadata.namespace = Some("team-a".to_string());
        Arc::new(f)
    }

    #[test]
    fn retryable_errors_are_requeued() {
        let ctx = test_support::context(Arc::new(MemoryStore::new()));
        let err = Error::internal_with_context("test", "apiserver unavailable");
        assert_eq!(
            error_policy(fork(), &err, ctx),
            Action::requeue(Duration::from_secs(30))
        );
    }

    #[test]
    fn invalid_input_waits_for_change() {
        let ctx = test_support::context(Arc::new(MemoryStore::new()));
        let err = Error::validation("bad manager reference");
        assert_eq!(error_policy(fork(), &err, ctx), Action::await_change());
    }
}
