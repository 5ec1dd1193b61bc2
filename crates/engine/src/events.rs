//! Lifecycle event channel between the engine and the operator UI.
//!
//! Events are the only way the surrounding UI learns what a context is
//! doing. Delivery is broadcast: every subscriber sees every event
//! emitted after it subscribed, with lag handled by dropping oldest
//! events and logging.

use tokio::sync::broadcast;

/// State changes surfaced to the operator layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// An open attempt has started; credentials are being seeded.
    Loading,
    /// The context reached `Visible` and is showing the target page.
    Loaded,
    /// The open attempt failed terminally; the context was torn down.
    Error(String),
    /// The context was closed (user action, escape key, or replacement).
    Closed,
}

/// Broadcast hub for [`LifecycleEvent`]s, owned by the lifecycle
/// manager. Emission never blocks and never fails: events emitted with
/// no subscribers are simply dropped.
pub struct EventHub {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: LifecycleEvent) {
        tracing::debug!(target: "relive.engine", ?event, "lifecycle event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Receiver half of the hub with automatic lag handling.
pub struct EventStream {
    rx: broadcast::Receiver<LifecycleEvent>,
}

impl EventStream {
    /// Receives the next event, or `None` once the hub is dropped.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(target: "relive.engine", dropped = n, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receives without blocking; `None` when nothing is pending.
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(target: "relive.engine", dropped = n, "event stream lagged");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_subscribers_see_emitted_events() {
        let hub = EventHub::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.emit(LifecycleEvent::Loading);
        hub.emit(LifecycleEvent::Loaded);

        assert_eq!(a.recv().await, Some(LifecycleEvent::Loading));
        assert_eq!(a.recv().await, Some(LifecycleEvent::Loaded));
        assert_eq!(b.recv().await, Some(LifecycleEvent::Loading));
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_a_no_op() {
        let hub = EventHub::new(8);
        hub.emit(LifecycleEvent::Closed);
        let mut stream = hub.subscribe();
        assert_eq!(stream.try_recv(), None);
    }

    #[tokio::test]
    async fn stream_ends_when_hub_dropped() {
        let hub = EventHub::new(8);
        let mut stream = hub.subscribe();
        drop(hub);
        assert_eq!(stream.recv().await, None);
    }
}
