// Observers shipped with the crate

use crate::controller::{DataController, Notification, Observer};
use tokio::sync::broadcast;
use tracing::debug;

/// Logs every notification at debug level.
#[derive(Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn update(&self, _subject: &DataController, notification: &Notification) -> anyhow::Result<()> {
        debug!(
            event = %notification.event_type,
            records = notification.data.len(),
            "controller notification"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Forwards notifications into a broadcast channel.
///
/// The channel keeps the latest `capacity` notifications; a receiver that
/// falls behind loses the oldest ones and sees `RecvError::Lagged`. Having no
/// receivers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Observer for BroadcastObserver {
    fn update(&self, _subject: &DataController, notification: &Notification) -> anyhow::Result<()> {
        // Err only means nobody is listening right now.
        let _ = self.tx.send(notification.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "broadcast"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::EventType;
    use std::sync::Arc;
    use tokio::sync::broadcast::error::TryRecvError;

    #[test]
    fn broadcast_keeps_latest_and_lags_slow_receivers() {
        let controller = DataController::new();
        let observer = Arc::new(BroadcastObserver::new(2));
        let mut rx = observer.subscribe();
        controller.attach(observer.clone());

        for _ in 0..3 {
            controller.update_volumes(Vec::new());
        }

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(1))));
        assert_eq!(rx.try_recv().unwrap().event_type, EventType::VolumesUpdated);
        assert_eq!(rx.try_recv().unwrap().event_type, EventType::VolumesUpdated);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn broadcast_without_receivers_stays_attached() {
        let controller = DataController::new();
        controller.attach(Arc::new(BroadcastObserver::new(4)));
        controller.attach(Arc::new(LogObserver));
        controller.update_images(Vec::new());
        assert_eq!(controller.observer_count(), 2);
    }
}
