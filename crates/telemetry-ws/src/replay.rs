use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::warn;

/// Latest-value broadcast: live fan-out plus immediate replay of the most
/// recent value to receivers that subscribe late.
pub struct ReplayChannel<T> {
    inner: Arc<Mutex<ReplayState<T>>>,
}

struct ReplayState<T> {
    latest: Option<T>,
    sender: Option<broadcast::Sender<T>>,
}

impl<T> Clone for ReplayChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + 'static> ReplayChannel<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ReplayState {
                latest: None,
                sender: Some(broadcast::channel(capacity.max(1)).0),
            })),
        }
    }

    /// Returns false once the channel is closed; the value is discarded.
    pub fn publish(&self, value: T) -> bool {
        let mut state = self.inner.lock();
        let Some(sender) = state.sender.as_ref() else {
            return false;
        };
        // No receivers yet is fine: the value is retained for replay.
        let _ = sender.send(value.clone());
        state.latest = Some(value);
        true
    }

    pub fn subscribe(&self) -> ReplayReceiver<T> {
        let state = self.inner.lock();
        ReplayReceiver {
            pending: state.latest.clone(),
            rx: state.sender.as_ref().map(broadcast::Sender::subscribe),
        }
    }

    pub fn latest(&self) -> Option<T> {
        self.inner.lock().latest.clone()
    }

    /// Ends every receiver's stream after it drains what was already sent.
    pub fn close(&self) {
        self.inner.lock().sender.take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().sender.is_none()
    }

    pub fn receiver_count(&self) -> usize {
        self.inner
            .lock()
            .sender
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

pub struct ReplayReceiver<T> {
    pending: Option<T>,
    rx: Option<broadcast::Receiver<T>>,
}

impl<T: Clone> ReplayReceiver<T> {
    /// Next value, or `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target = "telemetry.ws.replay", skipped, "receiver lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }

    /// Non-blocking variant of [`ReplayReceiver::recv`]; `None` when nothing is buffered.
    pub fn try_recv(&mut self) -> Option<T> {
        if let Some(value) = self.pending.take() {
            return Some(value);
        }
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(value) => return Some(value),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(target = "telemetry.ws.replay", skipped, "receiver lagged, skipping ahead");
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
            }
        }
    }

    /// Collects everything currently buffered.
    pub fn drain_ready(&mut self) -> Vec<T> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn late_subscriber_sees_latest_value() {
        let channel = ReplayChannel::new(8);
        assert!(channel.publish(1));
        assert!(channel.publish(2));

        let mut late = channel.subscribe();
        assert_eq!(late.recv().await, Some(2));

        channel.publish(3);
        assert_eq!(late.recv().await, Some(3));
    }

    #[tokio::test]
    async fn live_subscribers_see_every_value() {
        let channel = ReplayChannel::new(8);
        let mut rx = channel.subscribe();
        for value in 1..=3 {
            channel.publish(value);
        }
        assert_eq!(rx.drain_ready(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn close_ends_streams_and_rejects_publish() {
        let channel = ReplayChannel::new(8);
        let mut rx = channel.subscribe();
        channel.publish("a");
        channel.close();

        assert!(channel.is_closed());
        assert!(!channel.publish("b"));
        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(rx.recv().await, None);

        let mut after = channel.subscribe();
        assert_eq!(after.recv().await, Some("a"));
        assert_eq!(after.recv().await, None);
    }

    #[test]
    fn try_recv_on_empty_channel() {
        let channel: ReplayChannel<u8> = ReplayChannel::new(1);
        let mut rx = channel.subscribe();
        assert_eq!(rx.try_recv(), None);
        assert_eq!(channel.receiver_count(), 1);
        assert_eq!(channel.latest(), None);
    }
}
