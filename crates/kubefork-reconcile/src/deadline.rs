//! Deadline watcher
//!
//! Polls all forks on a fixed interval and emits the key of every fork whose
//! deadline has passed. The receiving controller deletes it.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::discovery::ApiResource;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubefork_common::crd::Fork;
use kubefork_common::{as_typed_all, LabelQuery, NamespacedName, ResourceStore, Result};

/// Default interval between deadline checks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Keys of the forks whose deadline lies strictly before `now`
pub fn overdue_forks(forks: &[Fork], now: DateTime<Utc>) -> Vec<NamespacedName> {
    forks
        .iter()
        .filter(|f| f.is_expired(now))
        .map(NamespacedName::of)
        .collect()
}

/// Periodic emitter of expired fork keys
pub struct DeadlineWatcher {
    store: Arc<dyn ResourceStore>,
    interval: Duration,
}

impl DeadlineWatcher {
    /// Create a watcher checking every `interval`
    pub fn new(store: Arc<dyn ResourceStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    /// Run until `cancel` fires or the receiver of `tx` is dropped
    ///
    /// The first check happens immediately. Sends wait for channel capacity,
    /// so a slow consumer delays the next check instead of losing keys; a
    /// pending send still gives way to cancellation.
    pub async fn run(&self, tx: mpsc::Sender<NamespacedName>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = self.interval.as_secs(), "deadline watcher started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("deadline watcher cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.check(&tx, &cancel).await {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    info!("deadline watcher stopping");
                    return;
                }
                Err(e) => warn!(error = %e, "deadline check failed, retrying next tick"),
            }
        }
    }

    async fn check(
        &self,
        tx: &mpsc::Sender<NamespacedName>,
        cancel: &CancellationToken,
    ) -> Result<ControlFlow<()>> {
        let objs = self
            .store
            .list_all(&ApiResource::erase::<Fork>(&()), &LabelQuery::everything())
            .await?;
        let forks: Vec<Fork> = as_typed_all(&objs)?;

        let overdue = overdue_forks(&forks, Utc::now());
        debug!(forks = forks.len(), overdue = overdue.len(), "checked fork deadlines");

        for key in overdue {
            info!(fork = %key, "fork deadline passed");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("cancelled while waiting for trigger capacity");
                    return Ok(ControlFlow::Break(()));
                }
                sent = tx.send(key) => {
                    if sent.is_err() {
                        debug!("trigger receiver closed");
                        return Ok(ControlFlow::Break(()));
                    }
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Duration as ChronoDuration;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kubefork_common::crd::ForkSpec;
    use kubefork_common::store::{MemoryStore, MockResourceStore};
    use kubefork_common::{to_dynamic, Error};

    fn fork(ns: &str, name: &str, deadline: Option<DateTime<Utc>>) -> Fork {
        let mut f = Fork::new(
            name,
            ForkSpec {
                manager: "gateway/main".to_string(),
                identifier: name.to_string(),
                deadline: deadline.map(Time),
                gateway_options: None,
                services: None,
                deployments: None,
            },
        );
        f.metadata.namespace = Some(ns.to_string());
        f
    }

    fn mixed_forks() -> Vec<Fork> {
        let now = Utc::now();
        vec![
            fork("team-a", "expired", Some(now - ChronoDuration::hours(1))),
            fork("team-a", "future", Some(now + ChronoDuration::hours(1))),
            fork("team-b", "forever", None),
        ]
    }

    fn store_with(forks: &[Fork]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for f in forks {
            store.seed(&ApiResource::erase::<Fork>(&()), to_dynamic(f).unwrap());
        }
        store
    }

    #[test]
    fn only_past_deadlines_are_overdue() {
        let overdue = overdue_forks(&mixed_forks(), Utc::now());
        assert_eq!(overdue, vec![NamespacedName::new("team-a", "expired")]);
    }

    #[test]
    fn deadline_equal_to_now_is_not_overdue() {
        let now = Utc::now();
        let forks = vec![fork("team-a", "edge", Some(now))];
        assert!(overdue_forks(&forks, now).is_empty());
    }

    /// Story: one expired fork among others yields exactly one trigger per
    /// check, and cancellation ends the loop
    #[tokio::test(start_paused = true)]
    async fn story_expired_fork_is_emitted_once_per_check() {
        let watcher = DeadlineWatcher::new(store_with(&mixed_forks()), DEFAULT_CHECK_INTERVAL);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { watcher.run(tx, cancel).await }
        });

        assert_eq!(
            rx.recv().await,
            Some(NamespacedName::new("team-a", "expired"))
        );
        // Next check re-emits the fork while it still exists
        assert_eq!(
            rx.recv().await,
            Some(NamespacedName::new("team-a", "expired"))
        );

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn no_expired_forks_emit_nothing() {
        let now = Utc::now();
        let forks = vec![
            fork("team-a", "future", Some(now + ChronoDuration::hours(1))),
            fork("team-a", "forever", None),
        ];
        let watcher = DeadlineWatcher::new(store_with(&forks), DEFAULT_CHECK_INTERVAL);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { watcher.run(tx, cancel).await }
        });

        tokio::time::sleep(DEFAULT_CHECK_INTERVAL * 3).await;
        assert!(rx.try_recv().is_err());

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_receiver_stops_watcher() {
        let watcher = DeadlineWatcher::new(store_with(&mixed_forks()), DEFAULT_CHECK_INTERVAL);
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        watcher.run(tx, CancellationToken::new()).await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_send_to_full_channel() {
        let now = Utc::now();
        let forks: Vec<Fork> = ["one", "two", "three"]
            .iter()
            .map(|name| fork("team-a", name, Some(now - ChronoDuration::hours(1))))
            .collect();
        let watcher = DeadlineWatcher::new(store_with(&forks), DEFAULT_CHECK_INTERVAL);
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { watcher.run(tx, cancel).await }
        });

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        cancel.cancel();
        tokio::time::timeout(DEFAULT_CHECK_INTERVAL, handle)
            .await
            .expect("watcher did not stop after cancellation")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_list_is_retried_on_next_tick() {
        let expired = to_dynamic(&mixed_forks()[0]).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut store = MockResourceStore::new();
        let counter = calls.clone();
        store.expect_list_all().returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::internal_with_context("test", "apiserver unavailable"))
            } else {
                Ok(vec![expired.clone()])
            }
        });

        let watcher = DeadlineWatcher::new(Arc::new(store), DEFAULT_CHECK_INTERVAL);
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move { watcher.run(tx, cancel).await }
        });

        assert_eq!(
            rx.recv().await,
            Some(NamespacedName::new("team-a", "expired"))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
