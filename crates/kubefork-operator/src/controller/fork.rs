//! Fork controller

use std::sync::Arc;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::instrument;

use kubefork_common::crd::Fork;
use kubefork_common::{Error, NamespacedName};

use super::Context;

/// Reconcile a Fork: expire it, or refresh its mappings and copies
#[instrument(skip(fork, ctx), fields(fork = %fork.name_any()))]
pub async fn reconcile(fork: Arc<Fork>, ctx: Arc<Context>) -> Result<Action, Error> {
    let key = NamespacedName::of(fork.as_ref());
    ctx.reconciler.reconcile_fork(&key, Utc::now()).await?;
    Ok(Action::await_change())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::discovery::ApiResource;
    use kubefork_common::crd::ForkSpec;
    use kubefork_common::store::MemoryStore;
    use kubefork_common::{as_typed, to_dynamic};

    use crate::controller::test_support;

    #[tokio::test]
    async fn expired_fork_is_deleted() {
        let store = Arc::new(MemoryStore::new());
        let mut fork = Fork::new(
            "dev",
            ForkSpec {
                manager: "gateway/main".to_string(),
                identifier: "alice".to_string(),
                deadline: Some(Time(Utc::now() - Duration::hours(1))),
                gateway_options: None,
                services: None,
                deployments: None,
            },
        );
        fork.metadata.namespace = Some("team-a".to_string());
        let resource = ApiResource::erase::<Fork>(&());
        let seeded = store.seed(&resource, to_dynamic(&fork).unwrap());

        let action = reconcile(Arc::new(as_typed(&seeded).unwrap()), test_support::context(store.clone()))
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert!(store.objects(&resource, "team-a").is_empty());
    }
}
