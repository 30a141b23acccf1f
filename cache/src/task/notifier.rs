use crate::listener::{EvictionListener, EvictionReason};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// A message sent to the notifier thread.
pub(crate) type Notification<K, V> = (K, Arc<V>, EvictionReason);

const NOTIFICATION_CHANNEL_CAPACITY: usize = 1024;

/// The background thread responsible for calling the user's eviction listener.
///
/// The thread exits once every sender, including the one owned by the
/// cache, has been dropped.
pub(crate) struct Notifier<K, V> {
  sender: Sender<Notification<K, V>>,
  _handle: Option<JoinHandle<()>>,
}

impl<K, V> Notifier<K, V>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  pub(crate) fn spawn(listener: Arc<dyn EvictionListener<K, V>>) -> Self {
    let (sender, receiver): (Sender<Notification<K, V>>, Receiver<Notification<K, V>>) =
      crossbeam_channel::bounded(NOTIFICATION_CHANNEL_CAPACITY);

    let handle = thread::Builder::new()
      .name("cache-notifier".into())
      .spawn(move || {
        while let Ok((key, value, reason)) = receiver.recv() {
          listener.on_evict(key, value, reason);
        }
      })
      .map_err(|e| tracing::warn!(error = %e, "failed to spawn notifier thread, listener disabled"))
      .ok();

    Self {
      sender,
      _handle: handle,
    }
  }

  /// Queues a notification. Never blocks; drops it if the listener is too
  /// far behind.
  pub(crate) fn notify(&self, key: K, value: Arc<V>, reason: EvictionReason) {
    match self.sender.try_send((key, value, reason)) {
      Ok(()) => {}
      Err(TrySendError::Full(_)) => {
        tracing::warn!(%reason, "eviction listener is falling behind, notification dropped");
      }
      Err(TrySendError::Disconnected(_)) => {}
    }
  }
}
