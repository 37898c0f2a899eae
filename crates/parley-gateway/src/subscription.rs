use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parley_types::events::LiveEvent;
use parley_types::models::TargetKey;

/// Source of per-conversation live subscriptions.
pub trait LiveStream {
    /// Open a subscription bound to `target`. Events flow until the returned
    /// handle is cancelled or dropped.
    fn subscribe(&self, target: TargetKey) -> Subscription;
}

/// Handle to one live subscription. Dropping it cancels the subscription.
pub struct Subscription {
    target: TargetKey,
    events: mpsc::UnboundedReceiver<LiveEvent>,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(
        target: TargetKey,
        events: mpsc::UnboundedReceiver<LiveEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            target,
            events,
            cancel,
        }
    }

    pub fn target(&self) -> TargetKey {
        self.target
    }

    /// Next event, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<LiveEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
