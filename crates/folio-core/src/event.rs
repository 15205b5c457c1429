//! Events the core sends back to whatever presents it.
//!
//! The action engine never calls into a UI. It pushes [`EngineEvent`]s into
//! a channel and the frontend drains them through [`EngineEvents`], which
//! also merges in removals completed by other engines sharing the same
//! [`RemoveNotifier`](crate::action::notifier::RemoveNotifier).

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use crate::action::notifier::Removal;
use crate::fs::ItemInfo;

/// A notification the core sends back to the UI.
///
/// Events flow **Core → UI**. Within one action they arrive in the order the
/// engine touched the items.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// An item appeared at its final destination.
    Added(ItemInfo),
    /// An item is gone.
    Removed(ItemInfo),
    /// An existing item was modified in place (for example a merged directory).
    Changed(ItemInfo),
    /// Work done so far in the current action.
    Progress {
        /// Units completed.
        current: u64,
        /// Units the action consists of.
        total: u64,
        /// 0..=100, by bytes for copies and by items otherwise.
        percent: u8,
    },
    /// An action failed. The first field is a short title, the second the message.
    Error { title: String, message: String },
    /// The clipboard contents or operation changed.
    ClipboardChanged,
    /// A location cannot be read without credentials.
    NeedsAuthentication { user: String, url: String },
}

impl EngineEvent {
    pub fn is_progress(&self) -> bool {
        matches!(self, EngineEvent::Progress { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EngineEvent::Error { .. })
    }
}

/// Receiving half of an engine's event stream.
#[derive(Debug)]
pub struct EngineEvents {
    engine_id: u64,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
    removals: broadcast::Receiver<Removal>,
}

impl EngineEvents {
    pub(crate) fn new(
        engine_id: u64,
        rx: mpsc::UnboundedReceiver<EngineEvent>,
        removals: broadcast::Receiver<Removal>,
    ) -> Self {
        Self {
            engine_id,
            rx,
            removals,
        }
    }

    /// The next event if one is ready, without waiting.
    pub fn try_next(&mut self) -> Option<EngineEvent> {
        if let Ok(event) = self.rx.try_recv() {
            return Some(event);
        }
        loop {
            match self.removals.try_recv() {
                Ok(removal) if removal.engine_id != self.engine_id => {
                    return Some(EngineEvent::Removed(removal.item))
                }
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed removals from other engines");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// Every event that is ready now.
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Waits for the next event. `None` once the engine is gone.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        loop {
            tokio::select! {
                event = self.rx.recv() => return event,
                removal = self.removals.recv() => match removal {
                    Ok(removal) if removal.engine_id != self.engine_id => {
                        return Some(EngineEvent::Removed(removal.item));
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "missed removals from other engines");
                        continue;
                    }
                    Err(RecvError::Closed) => return self.rx.recv().await,
                },
            }
        }
    }
}
