//! Cross-engine removal broadcast.
//!
//! Every engine publishes the items it removed; every engine's event stream
//! re-emits removals published by the others, so two windows showing the
//! same directory both drop the row.

use tokio::sync::broadcast;
use tracing::trace;

use crate::fs::ItemInfo;

const CAPACITY: usize = 1024;

/// One completed removal and the engine that performed it.
#[derive(Debug, Clone)]
pub struct Removal {
    pub engine_id: u64,
    pub item: ItemInfo,
}

#[derive(Debug)]
pub struct RemoveNotifier {
    tx: broadcast::Sender<Removal>,
}

impl RemoveNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Removal> {
        self.tx.subscribe()
    }

    /// Publishes `item`. Having no subscribers is not an error.
    pub fn notify(&self, engine_id: u64, item: ItemInfo) {
        trace!(engine_id, path = item.path(), "broadcasting removal");
        let _ = self.tx.send(Removal { engine_id, item });
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for RemoveNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_see_removals() {
        let notifier = RemoveNotifier::new();
        let mut rx = notifier.subscribe();
        assert_eq!(notifier.subscriber_count(), 1);

        notifier.notify(7, ItemInfo::missing("/tmp/gone"));
        let removal = rx.try_recv().unwrap();
        assert_eq!(removal.engine_id, 7);
        assert_eq!(removal.item.path(), "/tmp/gone");
    }

    #[test]
    fn notify_without_subscribers_is_fine() {
        let notifier = RemoveNotifier::default();
        notifier.notify(1, ItemInfo::missing("/x"));
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
