use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::db::{PassStatus, PassStore};

use super::{PassEvent, PassNotifier};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Poll the store every `interval` and publish `PendingCountChanged` when
/// the number of pending passes moves. The first successful poll always
/// publishes.
pub async fn pending_watcher(
    store: Arc<dyn PassStore>,
    notifier: PassNotifier,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_count: Option<usize> = None;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match store.get_all().await {
                    Ok(passes) => {
                        let count = passes
                            .iter()
                            .filter(|pass| pass.status == PassStatus::Pending)
                            .count();
                        if last_count != Some(count) {
                            last_count = Some(count);
                            notifier.publish(PassEvent::PendingCountChanged { count });
                        }
                    }
                    Err(err) => log_error!("pending watcher poll failed: {err}"),
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("pending watcher shutting down");
                break;
            }
        }
    }
}

/// A running `pending_watcher` task.
pub struct PendingWatcher {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl PendingWatcher {
    pub fn spawn(store: Arc<dyn PassStore>, notifier: PassNotifier, interval: Duration) -> Self {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(pending_watcher(
            store,
            notifier,
            interval,
            cancel_token.clone(),
        ));
        Self {
            cancel_token,
            handle,
        }
    }

    pub async fn stop(self) {
        self.cancel_token.cancel();
        if let Err(err) = self.handle.await {
            log_error!("pending watcher task ended abnormally: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryPassStore, Pass};

    fn pending(id: &str) -> Pass {
        let mut pass = Pass::new(id, format!("CP-{id}"), "Visitor");
        pass.status = PassStatus::Pending;
        pass
    }

    async fn next_count(rx: &mut tokio::sync::broadcast::Receiver<PassEvent>) -> usize {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("watcher event")
            .expect("channel open");
        match event {
            PassEvent::PendingCountChanged { count } => count,
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn publishes_when_pending_count_changes() {
        let store = Arc::new(MemoryPassStore::with_passes(vec![pending("a")]));
        let notifier = PassNotifier::new();
        let mut rx = notifier.subscribe();

        let watcher = PendingWatcher::spawn(store.clone(), notifier, Duration::from_millis(10));
        assert_eq!(next_count(&mut rx).await, 1);

        store.add(pending("b")).await.unwrap();
        assert_eq!(next_count(&mut rx).await, 2);

        watcher.stop().await;
    }

    #[tokio::test]
    async fn stops_on_cancellation() {
        let store: Arc<dyn PassStore> = Arc::new(MemoryPassStore::new());
        let cancel_token = CancellationToken::new();
        let task = tokio::spawn(pending_watcher(
            store,
            PassNotifier::new(),
            Duration::from_millis(10),
            cancel_token.clone(),
        ));

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("watcher exits after cancel")
            .unwrap();
    }
}
