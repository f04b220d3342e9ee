//! Broadcast + history update bus for reconnecting clients.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Default number of updates kept for late subscribers.
const DEFAULT_HISTORY_LEN: usize = 1000;

/// Broadcast channel capacity.
const CHANNEL_CAPACITY: usize = 10_000;

/// Update bus with broadcast and bounded history.
///
/// New subscribers receive the history first, then live updates.
pub struct UpdateBus<T> {
    history: RwLock<VecDeque<T>>,
    history_len: usize,
    sender: broadcast::Sender<T>,
}

impl<T> Default for UpdateBus<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> UpdateBus<T>
where
    T: Clone + Send + 'static,
{
    /// Create a bus with the default history length.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history_len(DEFAULT_HISTORY_LEN)
    }

    /// Create a bus keeping at most `history_len` updates.
    #[must_use]
    pub fn with_history_len(history_len: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            history: RwLock::new(VecDeque::with_capacity(history_len.min(32))),
            history_len,
            sender,
        }
    }

    /// Publish an update to live subscribers and history.
    pub fn publish(&self, update: T) {
        // Send under the history lock so a concurrent snapshot+subscribe sees
        // each update exactly once.
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        let _ = self.sender.send(update.clone()); // live subscribers

        while history.len() >= self.history_len.max(1) {
            history.pop_front();
        }
        if self.history_len > 0 {
            history.push_back(update);
        }
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<T> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live updates.
    ///
    /// Lagged receivers silently skip the updates they missed.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, T> {
        let (history, rx) = {
            let history = self.history.read().unwrap_or_else(PoisonError::into_inner);
            (history.iter().cloned().collect::<Vec<_>>(), self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
