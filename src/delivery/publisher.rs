//! Single point through which the status aggregate is replaced.

use std::sync::Arc;

use tokio::sync::watch;

use crate::model::ServerStatus;

/// Holds the latest [`ServerStatus`] and fans it out to subscribers.
///
/// Updates run under the channel's write lock, so the read-modify-publish of
/// one round cannot interleave with another.
#[derive(Clone)]
pub struct StatusPublisher {
    tx: Arc<watch::Sender<ServerStatus>>,
}

impl StatusPublisher {
    pub fn new(initial: ServerStatus) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Latest published snapshot.
    pub fn current(&self) -> ServerStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.tx.subscribe()
    }

    /// Replace the aggregate with `f(current)` and return what was published.
    pub fn update<F>(&self, f: F) -> ServerStatus
    where
        F: FnOnce(&ServerStatus) -> ServerStatus,
    {
        let mut published = None;
        self.tx.send_modify(|current| {
            let next = f(current);
            *current = next.clone();
            published = Some(next);
        });
        published.unwrap_or_else(|| self.current())
    }
}

/// Log whenever the number of connected destinations changes.
///
/// Runs until the publisher is dropped.
pub async fn log_connectivity_changes(mut rx: watch::Receiver<ServerStatus>) {
    let mut last = rx.borrow_and_update().active_connections_count();

    while rx.changed().await.is_ok() {
        let (active, total) = {
            let status = rx.borrow_and_update();
            (status.active_connections_count(), status.destination_count())
        };
        if active != last {
            tracing::info!("Connectivity: {}/{} destinations connected (was {})", active, total, last);
            last = active;
        }
    }

    tracing::debug!("Connectivity log closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_update_notifies_subscribers() {
        let publisher = StatusPublisher::new(ServerStatus::new(["a", "b"], Utc::now()));
        let mut rx = publisher.subscribe();

        let published = publisher.update(|s| ServerStatus {
            total_failed_sends: s.total_failed_sends + 1,
            ..s.clone()
        });

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().total_failed_sends, 1);
        assert_eq!(published, publisher.current());
    }

    #[tokio::test]
    async fn test_connectivity_log_ends_with_publisher() {
        let publisher = StatusPublisher::new(ServerStatus::new(["a"], Utc::now()));
        let logger = tokio::spawn(log_connectivity_changes(publisher.subscribe()));

        publisher.update(|s| s.all_disconnected(Utc::now()));
        drop(publisher);

        tokio::time::timeout(std::time::Duration::from_secs(1), logger)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let publisher = StatusPublisher::new(ServerStatus::new(["a"], Utc::now()));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let publisher = publisher.clone();
                tokio::spawn(async move {
                    publisher.update(|s| ServerStatus {
                        total_successful_sends: s.total_successful_sends + 1,
                        ..s.clone()
                    });
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(publisher.current().total_successful_sends, 50);
    }
}
